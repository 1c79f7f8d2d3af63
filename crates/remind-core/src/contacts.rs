use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::Context;
use tracing::debug;

/// The contact-selection collaborator: a synchronous request/response
/// for one display name. `None` means the user cancelled.
pub trait ContactPicker {
    fn request_contact(&mut self) -> anyhow::Result<Option<String>>;
}

/// Prompts on stderr and reads one line from stdin. An empty line or
/// end-of-input is a cancellation.
#[derive(Debug, Default)]
pub struct StdinContactPicker;

impl StdinContactPicker {
    pub fn new() -> Self {
        Self
    }
}

impl ContactPicker for StdinContactPicker {
    fn request_contact(&mut self) -> anyhow::Result<Option<String>> {
        if !io::stdin().is_terminal() {
            debug!("stdin is not a terminal; treating as cancellation");
            return Ok(None);
        }

        let mut err = io::stderr();
        write!(err, "contact name (empty to finish): ").context("failed writing prompt")?;
        err.flush().context("failed flushing prompt")?;

        let mut line = String::new();
        let read = io::stdin()
            .lock()
            .read_line(&mut line)
            .context("failed reading contact name")?;
        if read == 0 {
            debug!("contact input reached end of stream");
            return Ok(None);
        }

        let name = line.trim();
        if name.is_empty() {
            return Ok(None);
        }
        Ok(Some(name.to_string()))
    }
}
