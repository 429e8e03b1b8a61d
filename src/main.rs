/////////////////////
/// TICKDOWN - a terminal countdown timer that keeps ticking in the background
///
/// The countdown runs on a dedicated background task, so the display loop
/// never owns the clock; pausing swaps the whole task out instead of
/// suspending it in place.
/// - 'space' starts & pauses the countdown
/// - 'r' resets to the configured duration
/// - 'e' edits the configured duration (digits, arrows, Enter commits)
/// - 'q' quits
///
pub const APP_VERSION: &str = "TICKDOWN V0.1.0";
pub const TICK_INTERVAL_MS: u64 = 1000;       // One countdown tick per second
pub const DEFAULT_DURATION_SECS: u32 = 5 * 60; // Default configured duration
const CONF_FILE_NAME: &str = "tickdown.ini";
const LOG_FILE_NAME: &str = "tickdown.log";

// Configuration validation constants
const MAX_DURATION_SECS: u32 = 99 * 60 + 59;  // Bounded by the mm:ss input format
const DEFAULT_VOLUME: f32 = 0.8;
const MIN_VOLUME: f32 = 0.0;
const MAX_VOLUME: f32 = 1.0;

// Edit buffer bounds
const MAX_MINUTES: u64 = 99;
const MAX_SECONDS: u64 = 59;
const MAX_FIELD_DIGITS: usize = 2;

// UI color thresholds
const COLOR_YELLOW_THRESHOLD: u32 = 20;       // Yellow warning threshold in seconds
const COLOR_RED_THRESHOLD: u32 = 8;           // Red warning threshold in seconds

// Notification beep
const BEEP_FREQ_HZ: f32 = 880.0;
const BEEP_DURATION_MS: u64 = 900;

use std::time::Duration;
#[macro_use] extern crate log;
extern crate simplelog;
use simplelog::*;
use std::fs::File;
#[macro_use]
extern crate ini;

use color_eyre::eyre::{eyre, Result};
use futures::{FutureExt, StreamExt};
use ratatui::{backend::CrosstermBackend as Backend, prelude::*, widgets::*};
use strum::EnumIs;
use tui_big_text::BigText;
use crossterm::event::{KeyEvent, KeyCode};
use rodio::source::{SineWave, Source};
use rodio::{OutputStream, OutputStreamHandle, Sink};
use build_time::{build_time_local};

/// Parse and validate a duration configuration value (whole seconds)
fn parse_duration_config(value: &str, config_name: &str, default: u32) -> u32 {
  match value.parse::<u32>() {
    Ok(secs) if secs <= MAX_DURATION_SECS => secs,
    Ok(secs) => {
      warn!("Config value '{}' = {} is out of valid range [0, {}], using default {}",
            config_name, secs, MAX_DURATION_SECS, default);
      eprintln!("Warning: {} value {} out of range, using default {}", config_name, secs, default);
      default
    }
    Err(e) => {
      warn!("Failed to parse config value '{}' = '{}': {}, using default {}",
            config_name, value, e, default);
      eprintln!("Warning: Invalid {} value '{}', using default {}", config_name, value, default);
      default
    }
  }
}

/// Parse and validate a volume configuration value
fn parse_volume_config(value: &str, config_name: &str, default: f32) -> f32 {
  match value.parse::<f32>() {
    Ok(vol) if (MIN_VOLUME..=MAX_VOLUME).contains(&vol) => vol,
    Ok(vol) => {
      warn!("Config value '{}' = {} is out of valid range [{}, {}], using default {}",
            config_name, vol, MIN_VOLUME, MAX_VOLUME, default);
      eprintln!("Warning: {} value {} out of range, using default {}", config_name, vol, default);
      default
    }
    Err(e) => {
      warn!("Failed to parse config value '{}' = '{}': {}, using default {}",
            config_name, value, e, default);
      eprintln!("Warning: Invalid {} value '{}', using default {}", config_name, value, default);
      default
    }
  }
}

/// Keep a minutes buffer well-formed: digits only, at most two of them,
/// clamped to 99. Returns the new buffer and whether focus should advance
/// to the seconds field.
fn sanitize_minutes(input: &str) -> (String, bool) {
  let digits: String = input.chars().filter(|c| c.is_ascii_digit()).collect();
  match digits.parse::<u64>() {
    Ok(value) if value > MAX_MINUTES => (MAX_MINUTES.to_string(), true),
    _ => {
      let buffer: String = digits.chars().take(MAX_FIELD_DIGITS).collect();
      let advance = digits.len() >= MAX_FIELD_DIGITS;
      (buffer, advance)
    }
  }
}

/// Keep a seconds buffer well-formed: digits only, at most two of them,
/// clamped to 59.
fn sanitize_seconds(input: &str) -> String {
  let digits: String = input.chars().filter(|c| c.is_ascii_digit()).collect();
  match digits.parse::<u64>() {
    Ok(value) if value > MAX_SECONDS => MAX_SECONDS.to_string(),
    _ => digits.chars().take(MAX_FIELD_DIGITS).collect(),
  }
}

fn format_mmss(total_secs: u32) -> String {
  format!("{:02}:{:02}", total_secs / 60, total_secs % 60)
}

fn split_mmss(total_secs: u32) -> (String, String) {
  (format!("{:02}", total_secs / 60), format!("{:02}", total_secs % 60))
}

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
  Error,
  Render,
  Key(KeyEvent),
  Timer(TimerEvent),
}

/// Scheduler -> controller events
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerEvent {
  Tick(u32),
  Completed,
}

/// Controller -> scheduler commands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TimerCommand {
  Start { time_left: u32 },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumIs)]
enum AppState {
  #[default]
  Idle,
  Running,
  Editing,
  Quitting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditField {
  Minutes,
  Seconds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Message {
  Toggle,
  Reset,
  BeginEdit,
  Digit(char),
  Erase,
  FocusLeft,
  FocusRight,
  Commit,
  Tick(u32),
  Completed,
  Redraw,
  Quit,
}

#[tokio::main]
async fn main() -> Result<()> {
  let mut app = TimerApp::default();
  app.run().await
}

/// Running counters for one scheduler instance. Constructed fresh per START,
/// so nothing leaks across replaced instances.
struct Countdown {
  configured: u32,
  time_left: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CountdownStep {
  Tick(u32),
  Completed,
}

impl Countdown {
  fn new(initial: u32) -> Self {
    Self { configured: initial, time_left: initial }
  }

  fn advance(&mut self) -> CountdownStep {
    self.time_left = self.time_left.saturating_sub(1);
    if self.time_left == 0 {
      // Roll back to the armed value and keep ticking; the countdown repeats
      // until the instance is discarded.
      self.time_left = self.configured;
      CountdownStep::Completed
    } else {
      CountdownStep::Tick(self.time_left)
    }
  }
}

/// One lifetime of the background countdown: spawned idle, armed by a single
/// START command, torn down by dropping the handle. The controller never
/// pauses an instance in place - it discards and replaces it.
struct TimerWorker {
  cmd_tx: tokio::sync::mpsc::UnboundedSender<TimerCommand>,
  cancellation_token: tokio_util::sync::CancellationToken,
  task: tokio::task::JoinHandle<()>,
}

impl TimerWorker {
  fn spawn(event_tx: tokio::sync::mpsc::UnboundedSender<Event>) -> Self {
    let (cmd_tx, mut cmd_rx) = tokio::sync::mpsc::unbounded_channel();
    let cancellation_token = tokio_util::sync::CancellationToken::new();
    let _cancellation_token = cancellation_token.clone();
    let task = tokio::spawn(async move {
      // Idle until armed; the controller decides when the countdown begins
      let initial = tokio::select! {
        _ = _cancellation_token.cancelled() => return,
        cmd = cmd_rx.recv() => match cmd {
          Some(TimerCommand::Start { time_left }) => time_left,
          None => return,
        },
      };
      debug!("Countdown armed with {}s", initial);
      let mut countdown = Countdown::new(initial);
      let mut interval = tokio::time::interval(Duration::from_millis(TICK_INTERVAL_MS));
      interval.tick().await; // the first tick of an interval resolves immediately
      loop {
        tokio::select! {
          _ = _cancellation_token.cancelled() => {
            break;
          }
          cmd = cmd_rx.recv() => {
            // Already counting; a repeated START has no effect
            if cmd.is_none() {
              break;
            }
          }
          _ = interval.tick() => {
            let event = match countdown.advance() {
              CountdownStep::Tick(time_left) => Event::Timer(TimerEvent::Tick(time_left)),
              CountdownStep::Completed => Event::Timer(TimerEvent::Completed),
            };
            if let Err(e) = event_tx.send(event) {
              log::error!("Failed to send timer event: {}", e);
              break;
            }
          }
        }
      }
    });
    Self { cmd_tx, cancellation_token, task }
  }

  fn start(&self, time_left: u32) {
    if let Err(e) = self.cmd_tx.send(TimerCommand::Start { time_left }) {
      log::error!("Failed to send start command: {}", e);
    }
  }
}

impl Drop for TimerWorker {
  fn drop(&mut self) {
    self.cancellation_token.cancel();
    self.task.abort();
  }
}

/// Completion beep. Holds the output stream for the process lifetime; each
/// notification stops whatever is still playing and starts over from the top,
/// so completions never overlap.
struct Notifier {
  _stream: OutputStream,
  handle: OutputStreamHandle,
  sink: Option<Sink>,
  volume: f32,
}

impl Notifier {
  fn new(volume: f32) -> Result<Self, rodio::StreamError> {
    let (stream, handle) = OutputStream::try_default()?;
    Ok(Self { _stream: stream, handle, sink: None, volume })
  }

  fn notify(&mut self) {
    if let Some(previous) = self.sink.take() {
      previous.stop();
    }
    let sink = match Sink::try_new(&self.handle) {
      Ok(sink) => sink,
      Err(e) => {
        warn!("Failed to open audio sink: {}", e);
        return;
      }
    };
    sink.set_volume(self.volume);
    let beep = SineWave::new(BEEP_FREQ_HZ).take_duration(Duration::from_millis(BEEP_DURATION_MS));
    sink.append(beep);
    self.sink = Some(sink);
  }
}

struct TimerApp {
  state: AppState,
  configured_time: u32,
  time_left: u32,
  volume: f32,
  edit_minutes: String,
  edit_seconds: String,
  focus: EditField,
  replace_on_input: bool,
  worker: Option<TimerWorker>,
  notifier: Option<Notifier>,
  event_tx: Option<tokio::sync::mpsc::UnboundedSender<Event>>,
}

impl Default for TimerApp {
  fn default() -> Self {
    Self::new()
  }
}

impl TimerApp {
  fn new() -> Self {
    Self {
      state: Default::default(),
      configured_time: DEFAULT_DURATION_SECS,
      time_left: DEFAULT_DURATION_SECS,
      volume: DEFAULT_VOLUME,
      edit_minutes: String::new(),
      edit_seconds: String::new(),
      focus: EditField::Minutes,
      replace_on_input: false,
      worker: None,
      notifier: None,
      event_tx: None,
    }
  }

  async fn run(&mut self) -> Result<()> {
    // Init logging
    let log_file = File::create(LOG_FILE_NAME).unwrap_or_else(|e| {
      eprintln!("Warning: Could not create log file: {}", e);
      eprintln!("Continuing with terminal logging only.");
      File::create("/dev/null").expect("Failed to open /dev/null")
    });

    CombinedLogger::init(
      vec![
        TermLogger::new(LevelFilter::Warn, Config::default(), TerminalMode::Mixed, ColorChoice::Auto),
        WriteLogger::new(LevelFilter::Info, Config::default(), log_file),
      ]
    ).unwrap_or_else(|e| {
      eprintln!("Warning: Could not initialize logger: {}", e);
    });

    info!("Logging for {} initialized (tick interval: {}ms)", APP_VERSION, TICK_INTERVAL_MS);

    // Load config from ini file; absence just means defaults
    info!("Reading config from {}", CONF_FILE_NAME);
    let inimap = match ini!(safe CONF_FILE_NAME) {
      Ok(map) => map,
      Err(error) => {
        info!("Couldn't load config file '{}': {}; using defaults", CONF_FILE_NAME, error);
        std::collections::HashMap::new()
      }
    };

    if let Some(section) = inimap.get("tickdown") {
      // Parse duration with validation
      if let Some(val) = section.get("duration").and_then(|v| v.as_ref()) {
        info!("Found duration config: {}", val);
        self.configured_time = parse_duration_config(val, "duration", DEFAULT_DURATION_SECS);
        self.time_left = self.configured_time;
        info!("Set configured duration to {} seconds", self.configured_time);
      }

      // Parse volume with validation
      if let Some(val) = section.get("volume").and_then(|v| v.as_ref()) {
        info!("Found volume config: {}", val);
        self.volume = parse_volume_config(val, "volume", DEFAULT_VOLUME);
      }
    }

    // Audio is best-effort: a missing output device must never stall the countdown
    self.notifier = match Notifier::new(self.volume) {
      Ok(notifier) => Some(notifier),
      Err(e) => {
        warn!("Audio output unavailable, completions will be silent: {}", e);
        None
      }
    };

    // Ratatui main loop
    let mut tui = Tui::new()?;
    tui.enter()?;
    self.event_tx = Some(tui.event_tx.clone());
    self.replace_worker();
    while !self.state.is_quitting() {
      tui.draw(|f| self.ui(f).expect("Unexpected error during drawing"))?;
      let event = tui.next().await.ok_or(eyre!("Unable to get event"))?; // blocks until next event
      let message = self.handle_event(event)?;
      self.update(message)?;
    }
    tui.exit()?;
    println!("Thanks for using {} (built: {})\n", APP_VERSION, build_time_local!("%Y-%b-%d at %H:%M:%S"));
    Ok(())
  }

  // Event handler (keyboard, timer events)
  fn handle_event(&self, event: Event) -> Result<Message> {
    let msg = match event {
      Event::Key(key) => {
        if self.state.is_editing() {
          match key.code {
            KeyCode::Char(c) if c.is_ascii_digit() => Message::Digit(c),
            KeyCode::Backspace => Message::Erase,
            KeyCode::Left => Message::FocusLeft,
            KeyCode::Right => Message::FocusRight,
            KeyCode::Enter => Message::Commit,
            KeyCode::Esc => Message::Quit,
            // Action keys blur the edit; any other character is stripped input
            KeyCode::Char(' ') => Message::Toggle,
            KeyCode::Char('r') | KeyCode::Char('R') => Message::Reset,
            _ => Message::Redraw,
          }
        } else {
          match key.code {
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => Message::Quit,
            KeyCode::Char(' ') | KeyCode::Enter => Message::Toggle,
            KeyCode::Char('r') | KeyCode::Char('R') => Message::Reset,
            KeyCode::Char('e') | KeyCode::Char('E') => Message::BeginEdit,
            _ => Message::Redraw,
          }
        }
      }
      Event::Timer(TimerEvent::Tick(time_left)) => Message::Tick(time_left),
      Event::Timer(TimerEvent::Completed) => Message::Completed,
      _ => Message::Redraw,
    };
    Ok(msg)
  }

  fn update(&mut self, message: Message) -> Result<()> {
    match message {
      // Leaving the edit via an action key commits the draft first, the same
      // way clicking outside the inputs does in a pointer UI
      Message::Toggle => {
        if self.state.is_editing() {
          self.commit_edit();
        }
        self.toggle();
      }
      Message::Reset => {
        if self.state.is_editing() {
          self.commit_edit();
        }
        self.reset();
      }
      Message::BeginEdit => self.begin_edit(),
      Message::Digit(c) => self.edit_digit(c),
      Message::Erase => self.edit_erase(),
      Message::FocusLeft => self.focus_left(),
      Message::FocusRight => self.focus_right(),
      Message::Commit => {
        if self.state.is_editing() {
          self.commit_edit();
        }
      }
      Message::Tick(time_left) => self.on_tick(time_left),
      Message::Completed => self.on_completed(),
      Message::Redraw => {}
      Message::Quit => self.quit(),
    }
    Ok(())
  }

  fn toggle(&mut self) {
    match self.state {
      AppState::Running => {
        // Pausing discards the running instance; time_left was already
        // synchronized by its last TICK
        self.replace_worker();
        self.state = AppState::Idle;
        info!("Paused at {}s", self.time_left);
      }
      AppState::Idle => match &self.worker {
        Some(worker) => {
          worker.start(self.time_left);
          self.state = AppState::Running;
          info!("Started countdown from {}s", self.time_left);
        }
        None => debug!("Toggle ignored: no scheduler instance"),
      },
      _ => {}
    }
  }

  fn reset(&mut self) {
    self.replace_worker();
    self.time_left = self.configured_time;
    self.state = AppState::Idle;
    info!("Reset to {}s", self.configured_time);
  }

  fn on_tick(&mut self, time_left: u32) {
    if !self.state.is_running() {
      debug!("Dropping tick from a discarded scheduler: {}s", time_left);
      return;
    }
    self.time_left = time_left;
  }

  fn on_completed(&mut self) {
    if !self.state.is_running() {
      debug!("Dropping completion from a discarded scheduler");
      return;
    }
    // The scheduler has already restarted itself; show a full clock again
    self.time_left = self.configured_time;
    info!("Countdown completed, repeating from {}s", self.configured_time);
    if let Some(notifier) = self.notifier.as_mut() {
      notifier.notify();
    }
  }

  fn begin_edit(&mut self) {
    if !self.state.is_idle() {
      return;
    }
    let (minutes, seconds) = split_mmss(self.configured_time);
    self.edit_minutes = minutes;
    self.edit_seconds = seconds;
    self.focus = EditField::Minutes;
    self.replace_on_input = false;
    self.state = AppState::Editing;
  }

  fn edit_digit(&mut self, c: char) {
    if !self.state.is_editing() {
      return;
    }
    match self.focus {
      EditField::Minutes => {
        let input = if self.replace_on_input {
          c.to_string()
        } else {
          format!("{}{}", self.edit_minutes, c)
        };
        let (buffer, advance) = sanitize_minutes(&input);
        self.edit_minutes = buffer;
        self.replace_on_input = false;
        if advance {
          self.focus = EditField::Seconds;
          self.replace_on_input = true;
        }
      }
      EditField::Seconds => {
        let input = if self.replace_on_input {
          c.to_string()
        } else {
          format!("{}{}", self.edit_seconds, c)
        };
        self.edit_seconds = sanitize_seconds(&input);
        self.replace_on_input = false;
      }
    }
  }

  fn edit_erase(&mut self) {
    if !self.state.is_editing() {
      return;
    }
    self.replace_on_input = false;
    match self.focus {
      EditField::Minutes => {
        self.edit_minutes.pop();
      }
      EditField::Seconds => {
        self.edit_seconds.pop();
      }
    }
  }

  // Arrow navigation marks the newly focused buffer so the next digit
  // replaces it wholesale, like select-on-focus in a form field
  fn focus_left(&mut self) {
    if !self.state.is_editing() {
      return;
    }
    if self.focus == EditField::Seconds {
      self.focus = EditField::Minutes;
      self.replace_on_input = true;
    }
  }

  fn focus_right(&mut self) {
    if !self.state.is_editing() {
      return;
    }
    if self.focus == EditField::Minutes {
      self.focus = EditField::Seconds;
      self.replace_on_input = true;
    }
  }

  fn commit_edit(&mut self) {
    let minutes: u32 = self.edit_minutes.parse().unwrap_or(0);
    let seconds: u32 = self.edit_seconds.parse().unwrap_or(0);
    let new_time = minutes * 60 + seconds;
    self.configured_time = new_time;
    if !self.state.is_running() {
      self.time_left = new_time;
    }
    if self.state.is_editing() {
      self.state = AppState::Idle;
    }
    self.edit_minutes.clear();
    self.edit_seconds.clear();
    info!("Configured duration set to {}s", new_time);
  }

  fn quit(&mut self) {
    self.state = AppState::Quitting;
  }

  /// Tear down the live scheduler instance (if any) and put a fresh idle one
  /// in its place. The old task is cancelled before the new one exists, so at
  /// most one instance can ever tick.
  fn replace_worker(&mut self) {
    self.worker = None;
    if let Some(event_tx) = &self.event_tx {
      self.worker = Some(TimerWorker::spawn(event_tx.clone()));
    }
  }

  fn ui(&mut self, f: &mut Frame) -> Result<()> {
    let layout = self.layout(f.size());
    f.render_widget(self.title_paragraph(), layout[0]);
    f.render_widget(self.timer_paragraph(), layout[1]);
    f.render_widget(self.config_paragraph(), layout[2]);
    f.render_widget(self.state_paragraph(), layout[3]);
    f.render_widget(self.help_paragraph(), layout[4]);
    Ok(())
  }

  fn layout(&self, area: Rect) -> Vec<Rect> {
    let layout = Layout::default()
      .direction(Direction::Vertical)
      .constraints(vec![
        Constraint::Length(3), // top bar
        Constraint::Length(9), // timer
        Constraint::Length(2), // configured duration / edit row
        Constraint::Length(2), // state
        Constraint::Length(2), // help
      ])
      .split(area);

    // Returns a vector of rectangles for the layout
    layout.to_vec()
  }

  fn title_paragraph(&mut self) -> Paragraph<'_> {
    let title_text =
      Line::from(vec![APP_VERSION.into(), " - ".into(), "a countdown that keeps counting".dim()]);
    Paragraph::new(title_text).gray()
  }

  fn timer_paragraph(&mut self) -> BigText<'_> {
    let mut style = Style::new().gray();
    if self.state.is_running() {
      if self.time_left > COLOR_YELLOW_THRESHOLD {
        style = Style::new().green();
      } else if self.time_left > COLOR_RED_THRESHOLD {
        style = Style::new().yellow();
      } else {
        style = Style::new().red();
      }
    } else if self.state.is_editing() {
      style = Style::new().blue();
    }
    let duration = format_mmss(self.time_left);
    let lines = vec![duration.into()];
    tui_big_text::BigTextBuilder::default()
      .lines(lines)
      .style(style)
      .build()
      .unwrap()
  }

  fn config_paragraph(&mut self) -> Paragraph<'_> {
    let config_text = if self.state.is_editing() {
      let focused = Style::new().add_modifier(Modifier::REVERSED);
      let (minutes_style, seconds_style) = match self.focus {
        EditField::Minutes => (focused, Style::new()),
        EditField::Seconds => (Style::new(), focused),
      };
      Line::from(vec![
        "set ".dim(),
        Span::styled(format!("{:>2}", self.edit_minutes), minutes_style),
        ":".into(),
        Span::styled(format!("{:>2}", self.edit_seconds), seconds_style),
      ])
    } else {
      Line::from(vec!["configured ".dim(), format_mmss(self.configured_time).into()])
    };
    Paragraph::new(config_text).gray()
  }

  fn state_paragraph(&mut self) -> Paragraph<'_> {
    let state_text = match self.state {
      AppState::Running => Line::from("running".green()),
      AppState::Editing => Line::from("editing".blue()),
      _ => Line::from("paused".dim()),
    };
    Paragraph::new(state_text)
  }

  fn help_paragraph(&mut self) -> Paragraph<'_> {
    let help_text = if self.state.is_editing() {
      Line::from(vec!["0-9 ".into(), "type".dim(), " : \u{2190}/\u{2192} ".into(), "field".dim(),
        " : bksp ".into(), "erase".dim(), " : enter ".into(), "commit".dim(), " : esc ".into(), "quit".dim()])
    } else {
      let space_action = if self.state.is_running() { "pause" } else { "start" };
      let edit_action1 = if self.state.is_running() { "" } else { " : e " };
      let edit_action2 = if self.state.is_running() { "" } else { "edit" };
      Line::from(vec!["space ".into(), space_action.dim(), edit_action1.into(), edit_action2.dim(),
        " : r ".into(), "reset".dim(), " : q ".into(), "quit".dim()])
    };
    Paragraph::new(help_text).gray()
  }
}

struct Tui {
  pub terminal: Terminal<Backend<std::io::Stderr>>,
  pub task: tokio::task::JoinHandle<()>,
  pub cancellation_token: tokio_util::sync::CancellationToken,
  pub event_rx: tokio::sync::mpsc::UnboundedReceiver<Event>,
  pub event_tx: tokio::sync::mpsc::UnboundedSender<Event>,
}

impl Tui {
  fn new() -> Result<Tui> {
    let mut terminal = ratatui::Terminal::new(Backend::new(std::io::stderr()))?;
    terminal.clear()?;
    let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
    let cancellation_token = tokio_util::sync::CancellationToken::new();
    let task = tokio::spawn(async {});
    Ok(Self { terminal, task, cancellation_token, event_rx, event_tx })
  }

  pub async fn next(&mut self) -> Option<Event> {
    self.event_rx.recv().await
  }

  pub fn enter(&mut self) -> Result<()> {
    crossterm::terminal::enable_raw_mode()?;
    crossterm::execute!(std::io::stderr(), crossterm::terminal::EnterAlternateScreen, crossterm::cursor::Hide)?;
    self.start();
    Ok(())
  }

  pub fn exit(&self) -> Result<()> {
    self.stop()?;
    crossterm::execute!(std::io::stderr(), crossterm::terminal::LeaveAlternateScreen, crossterm::cursor::Show)?;
    crossterm::terminal::disable_raw_mode()?;
    Ok(())
  }

  pub fn cancel(&self) {
    self.cancellation_token.cancel();
  }

  pub fn stop(&self) -> Result<()> {
    self.cancel();
    let mut counter = 0;
    while !self.task.is_finished() {
      std::thread::sleep(Duration::from_millis(250));
      counter += 1;
      if counter > 5 {
        self.task.abort();
      }
      if counter > 10 {
        log::error!("Failed to abort task for unknown reason");
        return Err(eyre!("Unable to abort task"));
      }
    }
    Ok(())
  }

  // Keyboard pump: the countdown cadence comes from the scheduler task, so
  // this only forwards input and resize events
  pub fn start(&mut self) {
    self.cancel();
    self.cancellation_token = tokio_util::sync::CancellationToken::new();
    let _cancellation_token = self.cancellation_token.clone();
    let _event_tx = self.event_tx.clone();
    self.task = tokio::spawn(async move {
      let mut reader = crossterm::event::EventStream::new();
      loop {
        let crossterm_event = reader.next().fuse();
        tokio::select! {
          _ = _cancellation_token.cancelled() => {
            break;
          }
          maybe_event = crossterm_event => {
            match maybe_event {
              Some(Ok(crossterm::event::Event::Key(key))) => {
                if key.kind == crossterm::event::KeyEventKind::Press {
                    if let Err(e) = _event_tx.send(Event::Key(key)) {
                      log::error!("Failed to send key event: {}", e);
                    }
                }
              }
              Some(Ok(_)) => {
                if let Err(e) = _event_tx.send(Event::Render) {
                  log::error!("Failed to send render event: {}", e);
                }
              }
              Some(Err(_)) => {
                if let Err(e) = _event_tx.send(Event::Error) {
                  log::error!("Failed to send error event: {}", e);
                }
              }
              None => {},
            }
          },
        }
      }
    });
  }
}

impl std::ops::Deref for Tui {
  type Target = ratatui::Terminal<Backend<std::io::Stderr>>;

  fn deref(&self) -> &Self::Target {
    &self.terminal
  }
}

impl std::ops::DerefMut for Tui {
  fn deref_mut(&mut self) -> &mut Self::Target {
    &mut self.terminal
  }
}

impl Drop for Tui {
  fn drop(&mut self) {
    if let Err(e) = self.exit() {
      eprintln!("Error during cleanup: {}", e);
      // Don't panic in Drop - just log the error
    }
  }
}
