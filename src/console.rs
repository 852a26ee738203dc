//! Terminal presentation layer
//!
//! Prints every status snapshot and turns key presses into session commands.
//! It only observes the session; all decisions stay in the orchestrator.
//!
//! Terminal reads block, so they run on their own OS thread. The runtime
//! never waits on that thread and the process can exit mid-read.

use std::io::BufRead;

use tokio::sync::{oneshot, watch};

use crate::session::{EventSink, SessionState, StatusSnapshot, UserCommand};

/// A line typed by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// Enter: start or stop recording
    Toggle,
    /// Leave the session
    Quit,
}

/// Interpret one line of terminal input
#[must_use]
pub fn parse_input(line: &str) -> Option<Input> {
    match line.trim() {
        "" => Some(Input::Toggle),
        "q" | "quit" | "exit" => Some(Input::Quit),
        _ => None,
    }
}

/// Command a toggle maps to, if the snapshot allows one
#[must_use]
pub const fn command_for(snapshot: &StatusSnapshot) -> Option<UserCommand> {
    if !snapshot.actionable {
        return None;
    }
    match snapshot.state {
        SessionState::Ready => Some(UserCommand::StartCapture),
        SessionState::Recording => Some(UserCommand::StopCapture),
        _ => None,
    }
}

/// One status line
#[must_use]
pub fn render(snapshot: &StatusSnapshot) -> String {
    let hint = match (&snapshot.state, snapshot.actionable) {
        (SessionState::Ready, true) => "  [Enter: talk, q: quit]",
        (SessionState::Recording, true) => "  [Enter: stop]",
        _ => "",
    };
    format!("[{}] {}{hint}", snapshot.state, snapshot.message)
}

/// Print snapshots until the session goes away
pub async fn print_status(mut status: watch::Receiver<StatusSnapshot>) {
    loop {
        let line = render(&status.borrow_and_update());
        println!("{line}");
        if status.changed().await.is_err() {
            break;
        }
    }
}

/// Read commands line by line until the user quits or input ends
///
/// # Errors
///
/// Returns error if reading the terminal fails
pub fn read_commands<R: BufRead>(
    reader: R,
    status: &watch::Receiver<StatusSnapshot>,
    events: &EventSink,
) -> std::io::Result<()> {
    for line in reader.lines() {
        match parse_input(&line?) {
            Some(Input::Quit) => return Ok(()),
            Some(Input::Toggle) => {
                let snapshot = status.borrow().clone();
                match command_for(&snapshot) {
                    Some(command) => events.emit(command),
                    None => println!("(busy: {})", snapshot.message),
                }
            }
            None => println!("(press Enter to talk or stop, q to quit)"),
        }
    }

    tracing::debug!("terminal input closed");
    Ok(())
}

/// Run [`read_commands`] on a dedicated input thread
///
/// The receiver resolves when the user quits, input ends or reading fails.
/// It reports closed if the thread could not start or died.
pub fn spawn_input<R>(
    reader: R,
    status: watch::Receiver<StatusSnapshot>,
    events: EventSink,
) -> oneshot::Receiver<std::io::Result<()>>
where
    R: BufRead + Send + 'static,
{
    let (done, finished) = oneshot::channel();

    let spawned = std::thread::Builder::new()
        .name("astra-input".to_string())
        .spawn(move || {
            // Nobody listening means the session already ended
            let _ = done.send(read_commands(reader, &status, &events));
        });
    if let Err(e) = spawned {
        tracing::error!(error = %e, "failed to start terminal input thread");
    }

    finished
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::session::{SessionEvent, state};

    /// Reader that blocks until its sender sends bytes or goes away
    struct HeldOpen(mpsc::Receiver<Vec<u8>>);

    impl Read for HeldOpen {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.0.recv() {
                Ok(bytes) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    Ok(n)
                }
                Err(_) => Ok(0),
            }
        }
    }

    #[test]
    fn enter_toggles_and_q_quits() {
        assert_eq!(parse_input(""), Some(Input::Toggle));
        assert_eq!(parse_input("  \n"), Some(Input::Toggle));
        assert_eq!(parse_input("q"), Some(Input::Quit));
        assert_eq!(parse_input("hello"), None);
    }

    #[test]
    fn toggle_follows_state_and_gate() {
        let ready = StatusSnapshot::new(SessionState::Ready, state::READY);
        assert_eq!(command_for(&ready), Some(UserCommand::StartCapture));

        let recording = StatusSnapshot::new(SessionState::Recording, state::RECORDING);
        assert_eq!(command_for(&recording), Some(UserCommand::StopCapture));

        let locked = StatusSnapshot::new(SessionState::Ready, state::REQUESTING_MIC).locked();
        assert_eq!(command_for(&locked), None);

        let speaking = StatusSnapshot::new(SessionState::Speaking, state::SPEAKING);
        assert_eq!(command_for(&speaking), None);
    }

    #[test]
    fn render_shows_state_and_hint() {
        let ready = StatusSnapshot::new(SessionState::Ready, state::READY);
        assert_eq!(render(&ready), "[ready] Ready to listen  [Enter: talk, q: quit]");

        let waiting = StatusSnapshot::new(SessionState::AwaitingReply, state::PROCESSING);
        assert_eq!(render(&waiting), "[awaiting-reply] Processing your message...");
    }

    #[test]
    fn lines_become_commands_until_quit() {
        let (_tx, status) =
            watch::channel(StatusSnapshot::new(SessionState::Ready, state::READY));
        let (events, mut rx) = EventSink::channel();

        read_commands(Cursor::new("\nhello\n\nq\n\n"), &status, &events).unwrap();

        let mut commands = Vec::new();
        while let Ok(SessionEvent::Command(command)) = rx.try_recv() {
            commands.push(command);
        }
        // Status never moved, so both toggles map to start; nothing after quit
        assert_eq!(
            commands,
            vec![UserCommand::StartCapture, UserCommand::StartCapture]
        );
    }

    #[test]
    fn pending_read_does_not_hold_the_runtime() {
        let (feed, held) = mpsc::channel();
        let (_tx, status) =
            watch::channel(StatusSnapshot::new(SessionState::Ready, state::READY));
        let (events, _rx) = EventSink::channel();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        let finished = runtime.block_on(async move {
            spawn_input(std::io::BufReader::new(HeldOpen(held)), status, events)
        });

        let started = Instant::now();
        drop(runtime);
        assert!(started.elapsed() < Duration::from_secs(1));

        // Closing input lets the thread report a clean end
        drop(feed);
        assert!(matches!(finished.blocking_recv(), Ok(Ok(()))));
    }
}
