use std::collections::VecDeque;
use std::io::Write;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use super::diagnostics::Diagnostic;
use super::session::{ConnectOutcome, ConnectionState, Session};
use crate::display::{render_logs, render_status, RedrawLimiter, StatusView};
use crate::payload::{Command, Direction};
use crate::state::TelemetryState;
use crate::{Error, Result};

const RECENT_DIAGNOSTICS: usize = 20;

/// One line typed at the console prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Send(Command),
    Jog(Direction),
    Clean,
    EmergencyToggle,
    Status,
    Logs,
    Diagnostics,
    Connect,
    Disconnect,
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let line = s.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let command = match word.to_ascii_lowercase().as_str() {
            "auto" => ConsoleCommand::Send(Command::ModeAuto),
            "manual" => ConsoleCommand::Send(Command::ModeManual),
            "east" => ConsoleCommand::Jog(Direction::East),
            "west" => ConsoleCommand::Jog(Direction::West),
            "halt" => ConsoleCommand::Send(Command::halt()),
            "clean" => ConsoleCommand::Clean,
            "estop" => ConsoleCommand::EmergencyToggle,
            "stop" => ConsoleCommand::Send(Command::Stop),
            "resume" => ConsoleCommand::Send(Command::Resume),
            "raw" => {
                if rest.is_empty() {
                    return Err("raw needs a token, e.g. raw DC:120".into());
                }
                ConsoleCommand::Send(rest.parse()?)
            }
            "status" => ConsoleCommand::Status,
            "logs" => ConsoleCommand::Logs,
            "diag" => ConsoleCommand::Diagnostics,
            "connect" => ConsoleCommand::Connect,
            "disconnect" => ConsoleCommand::Disconnect,
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" | "q" => ConsoleCommand::Quit,
            "" => return Err("empty command".into()),
            other => return Err(format!("unknown command '{other}'")),
        };
        if !rest.is_empty() && word != "raw" {
            return Err(format!("'{word}' takes no arguments"));
        }
        Ok(command)
    }
}

const CONSOLE_HELP: &str = "\
commands:
  auto | manual        switch tracking mode
  east | west          jog the motor (manual mode)
  halt                 stop the motor (DC:0)
  clean                run the panel cleaning cycle (manual mode)
  estop                emergency stop, or resume when latched
  stop | resume        send STOP / RESUME directly
  raw <token>          send any token, e.g. raw DC:-120
  status | logs | diag show the panel, device logs, recent diagnostics
  connect | disconnect open or close the link
  quit                 disconnect and exit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleSettings {
    pub stale_after: Duration,
    pub jog_duty: u8,
    pub jog_hold: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Line-oriented operator console driving one [`Session`].
pub struct Console<W: Write> {
    session: Session,
    settings: ConsoleSettings,
    out: W,
    recent: VecDeque<Diagnostic>,
    limiter: RedrawLimiter,
}

impl<W: Write> Console<W> {
    pub fn new(session: Session, settings: ConsoleSettings, out: W) -> Self {
        Self {
            session,
            settings,
            out,
            recent: VecDeque::with_capacity(RECENT_DIAGNOSTICS),
            limiter: RedrawLimiter::default(),
        }
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Connect, then serve commands until `quit`, end of input or `shutdown`.
    /// The link is always released on the way out.
    pub async fn run<R>(&mut self, input: R, shutdown: CancellationToken) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut telemetry = self.session.telemetry();
        let mut connection = self.session.connection();
        let mut diagnostics = self.session.diagnostics();
        let mut lines = input.lines();
        let mut dirty = false;

        self.connect().await?;

        let result = loop {
            let wait = self.limiter.remaining(Instant::now());
            tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                line = lines.next_line() => match line {
                    Ok(Some(line)) => match self.execute(&line).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Quit) => break Ok(()),
                        Err(err) => break Err(err),
                    },
                    Ok(None) => break Ok(()),
                    Err(err) => break Err(Error::Io(err)),
                },
                changed = telemetry.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                    telemetry.borrow_and_update();
                    dirty = true;
                }
                changed = connection.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                    let state = *connection.borrow_and_update();
                    if let Err(err) = writeln!(self.out, "link: {state}") {
                        break Err(err.into());
                    }
                }
                diagnostic = diagnostics.recv() => match diagnostic {
                    Ok(diagnostic) => self.remember(diagnostic),
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break Ok(()),
                },
                _ = tokio::time::sleep(wait), if dirty => {
                    if self.limiter.allow(Instant::now()) {
                        dirty = false;
                        if let Err(err) = self.print_status() {
                            break Err(err);
                        }
                    }
                }
            }
        };

        self.session.disconnect().await;
        writeln!(self.out, "bye")?;
        self.out.flush()?;
        result
    }

    async fn execute(&mut self, line: &str) -> Result<Flow> {
        if line.trim().is_empty() {
            return Ok(Flow::Continue);
        }
        let command = match line.parse::<ConsoleCommand>() {
            Ok(command) => command,
            Err(msg) => {
                writeln!(self.out, "? {msg} (type 'help')")?;
                return Ok(Flow::Continue);
            }
        };

        match command {
            ConsoleCommand::Send(cmd) => self.send(cmd)?,
            ConsoleCommand::Jog(direction) => {
                if self.require_manual("jog")? {
                    let ConsoleSettings {
                        jog_duty, jog_hold, ..
                    } = self.settings;
                    if !self.session.jog(direction, jog_duty, jog_hold).await {
                        self.dropped()?;
                    }
                }
            }
            ConsoleCommand::Clean => {
                if self.require_manual("clean")? {
                    self.send(Command::Clean)?;
                }
            }
            ConsoleCommand::EmergencyToggle => {
                if !self.session.emergency_toggle() {
                    self.dropped()?;
                }
            }
            ConsoleCommand::Status => self.print_status()?,
            ConsoleCommand::Logs => {
                let logs = render_logs(&self.session.telemetry().borrow().logs);
                write!(self.out, "{logs}")?;
            }
            ConsoleCommand::Diagnostics => {
                if self.recent.is_empty() {
                    writeln!(self.out, "no diagnostics")?;
                }
                for diagnostic in &self.recent {
                    writeln!(self.out, "{}", diagnostic.to_json())?;
                }
            }
            ConsoleCommand::Connect => self.connect().await?,
            ConsoleCommand::Disconnect => {
                if !self.session.disconnect().await {
                    writeln!(self.out, "already disconnected")?;
                }
            }
            ConsoleCommand::Help => writeln!(self.out, "{CONSOLE_HELP}")?,
            ConsoleCommand::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    async fn connect(&mut self) -> Result<()> {
        match self.session.connect().await {
            Ok(ConnectOutcome::Connected) => {}
            Ok(ConnectOutcome::Cancelled) => writeln!(self.out, "device selection cancelled")?,
            Err(Error::Busy(msg)) => writeln!(self.out, "cannot connect: {msg}")?,
            Err(err) => writeln!(self.out, "failed to connect: {err}")?,
        }
        Ok(())
    }

    fn send(&mut self, command: Command) -> Result<()> {
        if !self.session.send(command) {
            self.dropped()?;
        }
        Ok(())
    }

    fn dropped(&mut self) -> Result<()> {
        if self.session.state() == ConnectionState::Connected {
            writeln!(self.out, "command queue full; command dropped")?;
            return Ok(());
        }
        self.not_connected()
    }

    fn not_connected(&mut self) -> Result<()> {
        writeln!(self.out, "not connected; command dropped")?;
        Ok(())
    }

    /// Motor and cleaning controls only apply in manual mode.
    fn require_manual(&mut self, what: &str) -> Result<bool> {
        if self.session.state() != ConnectionState::Connected {
            self.not_connected()?;
            return Ok(false);
        }
        if !self.session.telemetry().borrow().snapshot.manual() {
            writeln!(self.out, "{what} needs manual mode; type 'manual' first")?;
            return Ok(false);
        }
        Ok(true)
    }

    fn print_status(&mut self) -> Result<()> {
        let panel = {
            let telemetry = self.session.telemetry();
            let state: &TelemetryState = &telemetry.borrow();
            render_status(&StatusView {
                device: &self.session.settings().device,
                connection: self.session.state(),
                signal: state.signal(Instant::now(), self.settings.stale_after),
                state,
            })
        };
        write!(self.out, "{panel}")?;
        self.out.flush()?;
        Ok(())
    }

    fn remember(&mut self, diagnostic: Diagnostic) {
        if self.recent.len() == RECENT_DIAGNOSTICS {
            self.recent.pop_front();
        }
        self.recent.push_back(diagnostic);
    }
}
