//! The main control loop: one serial line, three producers.
//!
//! A single-threaded readiness loop watches the keyboard, the device's
//! inbound side and - only while somebody has something to say - the
//! device's outbound side. Each readiness event is dispatched to exactly
//! one producer: the [`ConsoleRelay`] while the session is idle, or the
//! active transfer machine otherwise.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event, KeyEventKind};
use log::{debug, warn};

use crate::console::ConsoleRelay;
use crate::transfer::{patch::PatchUploader, ymodem::YmodemSender, Session, Step};
use crate::transport::SerialLink;
use crate::utils::map_key;

/// How long one loop iteration waits for a keyboard event when no producer
/// has pending output. With output pending the wait is zero, so the
/// writable path is only ever polled while it is actually wanted.
const POLL_PERIOD: Duration = Duration::from_millis(20);

/// The keystroke that opens the command prompt instead of going to the
/// device.
const ESCAPE_CHAR: u8 = b'~';

/// The keystroke that requests shutdown. Raw mode stops the terminal from
/// turning Ctrl-C into a signal, so it arrives here as a plain key event
/// and must be intercepted before the console queue sees it.
const INTERRUPT_CHAR: u8 = 0x03;

/// Cooperative shutdown signal, checked once per loop iteration. Clones
/// share the flag, so a signal handler can hold one while the loop holds
/// another.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Source of command lines for the `~` prompt. The production
/// implementation suspends raw mode, runs a line editor with history and
/// path completion, and restores raw mode before returning.
pub trait CommandPrompt {
    fn read_line(&mut self) -> io::Result<Option<String>>;
}

/// A command entered at the `~` prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Patch(PathBuf),
    Ymodem(PathBuf),
}

/// Recognize `p <path>` and `y <path>`. Anything else is not a command;
/// the prompt keeps it in history and the loop ignores it.
pub(crate) fn parse_command(line: &str) -> Option<Command> {
    let mut words = line.split_whitespace();
    let verb = words.next()?;
    let path = words.next()?;
    if words.next().is_some() {
        return None;
    }
    match verb {
        "p" => Some(Command::Patch(PathBuf::from(path))),
        "y" => Some(Command::Ymodem(PathBuf::from(path))),
        _ => None,
    }
}

/// Owner of the serial line and the top-level event dispatcher.
pub struct Multiplexer<L, W, P> {
    link: L,
    display: W,
    prompt: P,
    relay: ConsoleRelay,
    session: Session,
}

impl<L, W, P> Multiplexer<L, W, P>
where
    L: SerialLink,
    W: Write,
    P: CommandPrompt,
{
    pub fn new(link: L, display: W, prompt: P) -> Self {
        Multiplexer {
            link,
            display,
            prompt,
            relay: ConsoleRelay::new(),
            session: Session::Idle,
        }
    }

    /// Run until the device hangs up or `cancel` fires. Returns normally
    /// in both cases; the caller exits with status 0.
    pub fn run(&mut self, cancel: &CancelToken) -> io::Result<()> {
        while !cancel.is_cancelled() {
            let timeout = if self.wants_write() {
                Duration::ZERO
            } else {
                POLL_PERIOD
            };
            if event::poll(timeout)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        if let Some(bytes) = map_key(&key) {
                            self.handle_key_bytes(&bytes, cancel)?;
                        }
                    }
                }
            }

            // Drain everything the device has for us right now.
            loop {
                match self.link.recv_byte() {
                    Ok(Some(byte)) => self.handle_inbound_byte(byte)?,
                    Ok(None) => break,
                    Err(err) => {
                        debug!("serial channel closed: {}", err);
                        write!(self.display, "EOF on TTY device\r\n")?;
                        self.display.flush()?;
                        return Ok(());
                    }
                }
            }

            if self.wants_write() {
                self.handle_writable()?;
            }
        }
        Ok(())
    }

    fn wants_write(&self) -> bool {
        if self.session.is_idle() {
            self.relay.wants_write()
        } else {
            self.session.wants_write()
        }
    }

    fn handle_key_bytes(&mut self, bytes: &[u8], cancel: &CancelToken) -> io::Result<()> {
        if bytes.first() == Some(&INTERRUPT_CHAR) {
            cancel.cancel();
            return Ok(());
        }
        if bytes.first() == Some(&ESCAPE_CHAR) {
            return self.handle_command_prompt();
        }
        for &byte in bytes {
            self.relay.push_key(byte, &mut self.display)?;
        }
        Ok(())
    }

    fn handle_command_prompt(&mut self) -> io::Result<()> {
        let line = match self.prompt.read_line()? {
            Some(line) => line,
            None => return Ok(()),
        };
        match parse_command(&line) {
            Some(Command::Patch(path)) => self.start_patch(&path),
            Some(Command::Ymodem(path)) => self.start_ymodem(&path),
            None => Ok(()),
        }
    }

    fn start_patch(&mut self, path: &std::path::Path) -> io::Result<()> {
        if !self.session.is_idle() {
            write!(self.display, "Unable to patch: transfer in progress\r\n")?;
            return self.display.flush();
        }
        match PatchUploader::new(path) {
            Ok(uploader) => {
                write!(
                    self.display,
                    "Beginning patch upload: {} bytes\r\n",
                    uploader.size()
                )?;
                self.display.flush()?;
                self.session = Session::Patch(uploader);
            }
            Err(err) => {
                warn!("patch upload refused: {}", err);
                write!(self.display, "{}\r\n", err)?;
                self.display.flush()?;
            }
        }
        Ok(())
    }

    fn start_ymodem(&mut self, path: &std::path::Path) -> io::Result<()> {
        if !self.session.is_idle() {
            write!(
                self.display,
                "Unable to transfer: transfer already in progress\r\n"
            )?;
            return self.display.flush();
        }
        match YmodemSender::new(path) {
            Ok(sender) => {
                write!(self.display, "YModem transfer start\r\n")?;
                self.display.flush()?;
                self.session = Session::Ymodem(sender);
            }
            Err(err) => {
                warn!("ymodem transfer refused: {}", err);
                write!(self.display, "{}\r\n", err)?;
                self.display.flush()?;
            }
        }
        Ok(())
    }

    /// The active transfer sees the byte first and may end the session;
    /// the byte is rendered on the local display either way.
    fn handle_inbound_byte(&mut self, byte: u8) -> io::Result<()> {
        let step = match &mut self.session {
            Session::Idle => Step::Active,
            Session::Patch(uploader) => uploader.on_byte(byte),
            Session::Ymodem(sender) => sender.on_byte(byte)?,
        };
        if step == Step::Finished {
            self.session = Session::Idle;
        }
        self.relay.render_inbound(byte, &mut self.display)
    }

    fn handle_writable(&mut self) -> io::Result<()> {
        let step = match &mut self.session {
            Session::Idle => {
                self.relay.on_writable(&mut self.link)?;
                Step::Active
            }
            Session::Patch(uploader) => uploader.on_writable(&mut self.link, &mut self.display)?,
            Session::Ymodem(sender) => {
                sender.on_writable(&mut self.link)?;
                Step::Active
            }
        };
        if step == Step::Finished {
            self.session = Session::Idle;
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
