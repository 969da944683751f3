use anyhow::{bail, Context, Result};

/// Lazily opened system clipboard.
///
/// The handle is kept for the life of the app: on X11 the copied text is only
/// served while the owning `arboard::Clipboard` is alive.
#[derive(Default)]
pub struct Clipboard {
    inner: Option<arboard::Clipboard>,
}

impl Clipboard {
    pub fn copy(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            bail!("nothing to copy");
        }
        if self.inner.is_none() {
            self.inner = Some(arboard::Clipboard::new().context("failed to access clipboard")?);
        }
        let Some(clipboard) = self.inner.as_mut() else {
            bail!("clipboard unavailable");
        };
        clipboard
            .set_text(text.to_string())
            .context("failed to set clipboard text")
    }
}
