//! Output capture for the duration of one Handle.
//!
//! Two paths feed one capture. The process stdout and stderr descriptors
//! are redirected while the outermost capture is active, so `println!`,
//! `eprintln!` and raw writes land in it. Bodies may also print through
//! [`out!`], [`outln!`] and [`errln!`], which write into the innermost
//! capture on the current thread; that is the only path nested captures
//! see, since a process holds at most one descriptor redirect.
//!
//! [`out!`]: crate::out
//! [`outln!`]: crate::outln
//! [`errln!`]: crate::errln

use std::cell::RefCell;
use std::fmt;
use std::io::{Read, Write};

use gag::BufferRedirect;
use tracing::{debug, warn};

use crate::context::{Context, Halt};
use crate::core::outcome::{CaseResult, Report};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Default)]
struct Buffer {
    stdout: String,
    stderr: String,
    truncated: usize,
    limit: usize,
}

impl Buffer {
    /// Append `text` up to the shared byte limit, cutting on a char
    /// boundary. Dropped bytes are counted.
    fn write(&mut self, stream: Stream, text: &str) {
        let used = self.stdout.len() + self.stderr.len();
        let mut keep = text.len().min(self.limit.saturating_sub(used));
        while !text.is_char_boundary(keep) {
            keep -= 1;
        }
        self.truncated += text.len() - keep;
        let target = match stream {
            Stream::Stdout => &mut self.stdout,
            Stream::Stderr => &mut self.stderr,
        };
        target.push_str(&text[..keep]);
    }
}

/// Redirect of the process stdout and stderr descriptors. Dropping it
/// restores both.
struct StreamRedirect {
    stdout: BufferRedirect,
    stderr: BufferRedirect,
}

impl StreamRedirect {
    fn acquire() -> Option<Self> {
        flush_process_streams();
        let redirect = BufferRedirect::stdout()
            .and_then(|stdout| Ok((stdout, BufferRedirect::stderr()?)));
        match redirect {
            Ok((stdout, stderr)) => Some(Self { stdout, stderr }),
            Err(err) => {
                debug!(err = %err, "process streams not redirected");
                None
            }
        }
    }

    fn drain_into(mut self, buffer: &mut Buffer) {
        flush_process_streams();
        for (stream, reader) in [
            (Stream::Stdout, &mut self.stdout),
            (Stream::Stderr, &mut self.stderr),
        ] {
            let mut bytes = Vec::new();
            match reader.read_to_end(&mut bytes) {
                Ok(_) => buffer.write(stream, &String::from_utf8_lossy(&bytes)),
                Err(err) => warn!(err = %err, ?stream, "failed to read redirected output"),
            }
        }
    }
}

fn flush_process_streams() {
    if let Err(err) = std::io::stdout().flush().and_then(|()| std::io::stderr().flush()) {
        warn!(err = %err, "failed to flush process streams");
    }
}

thread_local! {
    static CAPTURES: RefCell<Vec<Buffer>> = const { RefCell::new(Vec::new()) };
}

/// Write formatted output to the active capture, or to the process stream.
#[doc(hidden)]
pub fn write_fmt(stream: Stream, args: fmt::Arguments<'_>) {
    let text = args.to_string();
    let captured = CAPTURES.with(|captures| {
        let mut captures = captures.borrow_mut();
        match captures.last_mut() {
            Some(buffer) => {
                buffer.write(stream, &text);
                true
            }
            None => false,
        }
    });
    if captured {
        return;
    }
    let result = match stream {
        Stream::Stdout => std::io::stdout().lock().write_all(text.as_bytes()),
        Stream::Stderr => std::io::stderr().lock().write_all(text.as_bytes()),
    };
    if let Err(err) = result {
        warn!(err = %err, "failed to write uncaptured output");
    }
}

/// True while any capture is installed on this thread.
pub fn is_capturing() -> bool {
    CAPTURES.with(|captures| !captures.borrow().is_empty())
}

/// Print to the captured stdout.
#[macro_export]
macro_rules! out {
    ($($arg:tt)*) => {
        $crate::context::capture::write_fmt(
            $crate::context::capture::Stream::Stdout,
            format_args!($($arg)*),
        )
    };
}

/// Print a line to the captured stdout.
#[macro_export]
macro_rules! outln {
    () => {
        $crate::out!("\n")
    };
    ($($arg:tt)*) => {
        $crate::context::capture::write_fmt(
            $crate::context::capture::Stream::Stdout,
            format_args!("{}\n", format_args!($($arg)*)),
        )
    };
}

/// Print a line to the captured stderr.
#[macro_export]
macro_rules! errln {
    () => {
        $crate::context::capture::write_fmt(
            $crate::context::capture::Stream::Stderr,
            format_args!("\n"),
        )
    };
    ($($arg:tt)*) => {
        $crate::context::capture::write_fmt(
            $crate::context::capture::Stream::Stderr,
            format_args!("{}\n", format_args!($($arg)*)),
        )
    };
}

/// Installs a capture buffer; dropping the guard removes it again, so a
/// panic unwinding through the owner cannot leave it installed or keep the
/// process streams redirected.
pub struct CaptureGuard {
    depth: usize,
    redirect: Option<StreamRedirect>,
}

impl fmt::Debug for CaptureGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureGuard")
            .field("depth", &self.depth)
            .field("redirected", &self.redirect.is_some())
            .finish()
    }
}

impl CaptureGuard {
    /// Capture macro writes only.
    pub fn install(limit: usize) -> Self {
        let depth = CAPTURES.with(|captures| {
            let mut captures = captures.borrow_mut();
            captures.push(Buffer {
                limit,
                ..Buffer::default()
            });
            captures.len()
        });
        Self {
            depth,
            redirect: None,
        }
    }

    /// Also redirect the process streams when no other capture holds them.
    pub fn install_redirected(limit: usize) -> Self {
        let mut guard = Self::install(limit);
        guard.redirect = StreamRedirect::acquire();
        guard
    }

    pub fn is_redirected(&self) -> bool {
        self.redirect.is_some()
    }

    /// Remove the buffer and return what it collected.
    pub fn finish(mut self) -> CapturedOutput {
        let mut buffer = self.take();
        if let Some(redirect) = self.redirect.take() {
            redirect.drain_into(&mut buffer);
        }
        CapturedOutput {
            stdout: buffer.stdout,
            stderr: buffer.stderr,
            truncated: buffer.truncated,
        }
    }

    fn take(&self) -> Buffer {
        CAPTURES.with(|captures| {
            let mut captures = captures.borrow_mut();
            if captures.len() < self.depth {
                return Buffer::default();
            }
            // Inner captures leaked by a misbehaving owner go with ours.
            captures.truncate(self.depth);
            captures.pop().unwrap_or_default()
        })
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        let _ = self.take();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    pub truncated: usize,
}

impl CapturedOutput {
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty() && self.truncated == 0
    }

    pub fn into_report(self) -> Report {
        Report::Output {
            stdout: self.stdout,
            stderr: self.stderr,
            truncated: self.truncated,
        }
    }
}

/// Context redirecting output for one Handle. Always registered first, so
/// it starts before and closes after every other context.
#[derive(Debug)]
pub struct OutputCapture {
    enabled: bool,
    redirect: bool,
    limit: usize,
    guard: Option<CaptureGuard>,
}

impl OutputCapture {
    pub fn new(enabled: bool, limit: usize) -> Self {
        Self {
            enabled,
            redirect: false,
            limit,
            guard: None,
        }
    }

    /// Redirect the process streams as well while capturing.
    pub fn redirecting_streams(mut self, redirect: bool) -> Self {
        self.redirect = redirect;
        self
    }
}

impl Context for OutputCapture {
    fn name(&self) -> &'static str {
        "output_capture"
    }

    fn start(&mut self) -> Option<Halt> {
        if self.enabled {
            let guard = if self.redirect {
                CaptureGuard::install_redirected(self.limit)
            } else {
                CaptureGuard::install(self.limit)
            };
            debug!(redirected = guard.is_redirected(), "output capture installed");
            self.guard = Some(guard);
        }
        None
    }

    fn close(&mut self, result: Option<&mut CaseResult>) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let output = guard.finish();
        if output.truncated > 0 {
            warn!(truncated = output.truncated, "captured output truncated");
        }
        if output.is_empty() {
            return;
        }
        debug!(
            stdout_bytes = output.stdout.len(),
            stderr_bytes = output.stderr.len(),
            "attaching captured output"
        );
        if let Some(result) = result {
            result.push_report(output.into_report());
        }
    }
}
