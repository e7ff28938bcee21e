//! Logging setup
//!
//! Everything goes to stderr through a writer that masks bot tokens, so a
//! token echoed back in an error message or a Bot API URL never reaches the
//! log.

#![allow(clippy::non_std_lazy_statics)]

use lazy_regex::lazy_regex;
use std::io::{self, Write};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Token inside a Bot API URL: `https://api.telegram.org/bot<token>/method`
static RE_TOKEN_URL: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)");

/// Bare token
static RE_TOKEN_BARE: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})");

/// `bot<id>:<secret>` fragments
static RE_TOKEN_PREFIXED: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+");

/// Form-encoded or logged `bot_token=<value>`
static RE_TOKEN_FIELD: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(bot_token=)[^\s&]+");

/// Mask every bot token in `input`
#[must_use]
pub fn redact(input: &str) -> String {
    let output = RE_TOKEN_URL.replace_all(input, "$1[TELEGRAM_TOKEN]$3");
    let output = RE_TOKEN_BARE.replace_all(&output, "[TELEGRAM_TOKEN]");
    let output = RE_TOKEN_PREFIXED.replace_all(&output, "$1[TELEGRAM_TOKEN]");
    RE_TOKEN_FIELD
        .replace_all(&output, "$1[TELEGRAM_TOKEN]")
        .into_owned()
}

/// Writer that redacts every chunk before forwarding it
pub struct RedactingWriter<W: Write> {
    inner: W,
}

impl<W: Write> RedactingWriter<W> {
    /// Wrap `inner`
    pub const fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        self.inner.write_all(redact(&s).as_bytes())?;
        // Report the original length, the redacted text may differ in size
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// `MakeWriter` producing [`RedactingWriter`]s
pub struct RedactingMakeWriter<F> {
    make_inner: F,
}

impl<F> RedactingMakeWriter<F> {
    /// Wrap a writer factory such as `io::stderr`
    pub const fn new(make_inner: F) -> Self {
        Self { make_inner }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)())
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the `info` default.
pub fn init_logging() {
    let make_writer = RedactingMakeWriter::new(io::stderr);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}
