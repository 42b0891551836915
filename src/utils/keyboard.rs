//! Raw-mode keyboard handling and the `~` command prompt.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use dialoguer::{theme::ColorfulTheme, BasicHistory, Completion, Input};
use log::debug;

use crate::multiplexer::CommandPrompt;

/// Scoped raw-mode ownership for the local terminal. Raw mode is entered
/// on construction and left again when the guard drops, which covers every
/// exit path out of the main loop, including panics.
pub struct RawModeGuard(());

impl RawModeGuard {
    pub fn new() -> io::Result<RawModeGuard> {
        enable_raw_mode()?;
        Ok(RawModeGuard(()))
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

/// Translate a key event into the bytes a serial terminal would send.
/// Keys with no byte representation (function keys, media keys) map to
/// `None` and are swallowed.
pub(crate) fn map_key(key: &KeyEvent) -> Option<Vec<u8>> {
    match key.code {
        KeyCode::Char(c) => {
            if key.modifiers.contains(KeyModifiers::CONTROL) && c.is_ascii_alphabetic() {
                Some(vec![(c.to_ascii_uppercase() as u8) & 0x1f])
            } else {
                let mut buf = [0u8; 4];
                Some(c.encode_utf8(&mut buf).as_bytes().to_vec())
            }
        }
        KeyCode::Enter => Some(vec![b'\r']),
        KeyCode::Tab => Some(vec![b'\t']),
        KeyCode::Backspace => Some(vec![0x7f]),
        KeyCode::Esc => Some(vec![0x1b]),
        KeyCode::Up => Some(b"\x1b[A".to_vec()),
        KeyCode::Down => Some(b"\x1b[B".to_vec()),
        KeyCode::Right => Some(b"\x1b[C".to_vec()),
        KeyCode::Left => Some(b"\x1b[D".to_vec()),
        KeyCode::Home => Some(b"\x1b[H".to_vec()),
        KeyCode::End => Some(b"\x1b[F".to_vec()),
        KeyCode::Delete => Some(b"\x1b[3~".to_vec()),
        _ => None,
    }
}

/// Move to the start of a fresh line. Device output may have left the
/// cursor mid-line, and the line editor draws at the cursor position.
fn fresh_line(out: &mut dyn Write) -> io::Result<()> {
    out.write_all(b"\r\n")?;
    out.flush()
}

/// Filesystem completion for the path argument of `p` and `y`.
struct PathCompletion;

impl Completion for PathCompletion {
    fn get(&self, input: &str) -> Option<String> {
        let (head, fragment) = match input.rfind(char::is_whitespace) {
            Some(pos) => input.split_at(pos + 1),
            None => ("", input),
        };
        let path = Path::new(fragment);
        let (dir, prefix) = if fragment.ends_with('/') {
            (path, "".to_string())
        } else {
            (
                path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new(".")),
                path.file_name()?.to_string_lossy().into_owned(),
            )
        };

        let mut matches: Vec<String> = fs::read_dir(dir)
            .ok()?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(&prefix))
            .collect();
        matches.sort();
        let name = matches.into_iter().next()?;

        let completed = if dir == Path::new(".") && !fragment.starts_with("./") {
            name
        } else {
            dir.join(name).to_string_lossy().into_owned()
        };
        Some(format!("{}{}", head, completed))
    }
}

/// The interactive `~` prompt: suspends raw mode, runs a line editor with
/// history and path completion, and puts raw mode back before returning.
pub struct LinePrompt {
    history: BasicHistory,
}

impl LinePrompt {
    pub fn new() -> LinePrompt {
        LinePrompt {
            history: BasicHistory::new().no_duplicates(true),
        }
    }
}

impl Default for LinePrompt {
    fn default() -> Self {
        LinePrompt::new()
    }
}

impl CommandPrompt for LinePrompt {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        disable_raw_mode()?;
        fresh_line(&mut io::stdout())?;
        let theme = ColorfulTheme::default();
        let completion = PathCompletion;
        let result = Input::<String>::with_theme(&theme)
            .with_prompt("~")
            .allow_empty(true)
            .history_with(&mut self.history)
            .completion_with(&completion)
            .interact_text();
        enable_raw_mode()?;

        match result {
            Ok(line) if line.is_empty() => Ok(None),
            Ok(line) => {
                debug!("command line: {:?}", line);
                Ok(Some(line))
            }
            Err(err) => Err(io::Error::new(io::ErrorKind::Other, err)),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn plain_characters_map_to_their_bytes() {
        assert_eq!(map_key(&key(KeyCode::Char('a'))), Some(vec![b'a']));
        assert_eq!(map_key(&key(KeyCode::Char('~'))), Some(vec![b'~']));
        assert_eq!(map_key(&key(KeyCode::Char(' '))), Some(vec![b' ']));
    }

    #[test]
    fn control_characters_fold_to_the_low_range() {
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(map_key(&ctrl_c), Some(vec![0x03]));
        let ctrl_x = KeyEvent::new(KeyCode::Char('x'), KeyModifiers::CONTROL);
        assert_eq!(map_key(&ctrl_x), Some(vec![0x18]));
    }

    #[test]
    fn editing_keys_map_to_terminal_codes() {
        assert_eq!(map_key(&key(KeyCode::Enter)), Some(vec![b'\r']));
        assert_eq!(map_key(&key(KeyCode::Backspace)), Some(vec![0x7f]));
        assert_eq!(map_key(&key(KeyCode::Esc)), Some(vec![0x1b]));
        assert_eq!(map_key(&key(KeyCode::Up)), Some(b"\x1b[A".to_vec()));
    }

    #[test]
    fn unmappable_keys_are_swallowed() {
        assert_eq!(map_key(&key(KeyCode::F(5))), None);
        assert_eq!(map_key(&key(KeyCode::PageUp)), None);
    }

    #[test]
    fn prompt_starts_on_a_fresh_line() {
        let mut out = Vec::new();
        fresh_line(&mut out).unwrap();
        assert_eq!(out, b"\r\n");
    }

    #[test]
    fn completion_finds_unique_prefix() {
        let dir = std::env::temp_dir().join("scomm_completion_test");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("firmware.bin"), b"x").unwrap();

        let input = format!("y {}/firmw", dir.display());
        let completed = PathCompletion.get(&input).unwrap();
        assert_eq!(completed, format!("y {}/firmware.bin", dir.display()));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn completion_gives_up_without_a_match() {
        let input = "p /nonexistent-dir-zzz/file";
        assert_eq!(PathCompletion.get(input), None);
    }
}
