//! Output formatting (JSON/text) for cached routes and rtnetlink messages.

mod printable;

pub use printable::{protocol_name, scope_name, table_name};

use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

/// Output format options.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputOptions {
    /// Show attributes and provenance.
    pub details: bool,
    /// Pretty print (for JSON).
    pub pretty: bool,
    /// Prefix text lines with a timestamp.
    pub timestamp: bool,
}

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Plain text output.
    #[default]
    Text,
    /// JSON output, one document per line.
    Json,
}

/// Trait for types that can be printed.
pub trait Printable {
    /// Print as plain text.
    fn print_text<W: Write>(&self, w: &mut W, opts: &OutputOptions) -> std::io::Result<()>;

    /// Convert to JSON value.
    fn to_json(&self) -> serde_json::Value;

    /// Print in the specified format.
    fn print<W: Write>(
        &self,
        w: &mut W,
        format: OutputFormat,
        opts: &OutputOptions,
    ) -> std::io::Result<()> {
        match format {
            OutputFormat::Text => {
                write_timestamp(w, opts)?;
                self.print_text(w, opts)
            }
            OutputFormat::Json => {
                let json = self.to_json();
                if opts.pretty {
                    serde_json::to_writer_pretty(&mut *w, &json)?;
                } else {
                    serde_json::to_writer(&mut *w, &json)?;
                }
                writeln!(w)?;
                Ok(())
            }
        }
    }
}

/// Write a `[seconds.milliseconds] ` prefix if enabled.
pub fn write_timestamp<W: Write>(w: &mut W, opts: &OutputOptions) -> std::io::Result<()> {
    if opts.timestamp {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        write!(w, "[{}.{:03}] ", now.as_secs(), now.subsec_millis())?;
    }
    Ok(())
}
