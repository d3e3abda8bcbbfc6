//! Terminal host for the chat screen.
//!
//! DESIGN
//! ======
//! The host plays the platform's part: it feeds stdin lines to the screen,
//! renders effects to stdout, runs the sign-in flow as a line prompt, and
//! acts as the image picker for `/photo <path>`. One `tokio::select!` loop
//! multiplexes three sources:
//! - stdin lines
//! - screen completions (`ScreenEvents`)
//! - the in-flight sign-in request, if any
//!
//! Logs go to stderr (see `main.rs`); stdout carries only the conversation.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::adapter::MessageRow;
use crate::backend::{AuthService, Backend, BackendError, Credentials, IdpProvider, LocalImage, SignInResult, User};
use crate::screen::{ChatScreen, Effect, MenuItem, PickResult, PickerRequest, ScreenSettings};

const HELP: &str = "commands: /photo <path.jpg>  /signout  /quit  /help  (anything else is sent)";

// =============================================================================
// COMMANDS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Photo(PathBuf),
    SignOut,
    Quit,
    Help,
    Empty,
    Invalid(String),
}

#[must_use]
pub fn parse_command(line: &str) -> Command {
    let line = line.trim_end_matches(['\r', '\n']);
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Command::Empty;
    }
    if !trimmed.starts_with('/') {
        return Command::Send(line.to_owned());
    }
    let (name, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (trimmed, ""),
    };
    match name {
        "/photo" if !arg.is_empty() => Command::Photo(PathBuf::from(arg)),
        "/photo" => Command::Invalid("usage: /photo <path.jpg>".to_owned()),
        "/signout" => Command::SignOut,
        "/quit" | "/exit" => Command::Quit,
        "/help" => Command::Help,
        other => Command::Invalid(format!("unknown command {other}; try /help")),
    }
}

#[must_use]
pub fn render_row(row: MessageRow<'_>) -> String {
    let author = row.author();
    match row {
        MessageRow::Text { body, .. } => format!("{author}: {body}"),
        MessageRow::Photo { url, .. } => format!("{author}: [photo] {url}"),
    }
}

// =============================================================================
// SIGN-IN PROMPT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum PromptStep {
    Method,
    Email,
    Password { email: String },
    GoogleToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOutcome {
    Ask(String),
    Done(Credentials),
    Cancelled,
}

/// Line-by-line sign-in flow. A blank answer or `cancel` at any step
/// cancels the whole flow.
#[derive(Debug, Clone)]
pub struct SignInPrompt {
    providers: Vec<IdpProvider>,
    step: PromptStep,
}

impl SignInPrompt {
    #[must_use]
    pub fn new(providers: Vec<IdpProvider>) -> Self {
        let step = match providers.as_slice() {
            [IdpProvider::Email] => PromptStep::Email,
            [IdpProvider::Google] => PromptStep::GoogleToken,
            _ => PromptStep::Method,
        };
        Self { providers, step }
    }

    #[must_use]
    pub fn question(&self) -> String {
        match &self.step {
            PromptStep::Method => {
                let options: Vec<String> = self
                    .providers
                    .iter()
                    .enumerate()
                    .map(|(i, p)| format!("{}) {}", i + 1, p.label()))
                    .collect();
                format!("sign in with {} (blank to cancel):", options.join("  "))
            }
            PromptStep::Email => "email:".to_owned(),
            PromptStep::Password { .. } => "password:".to_owned(),
            PromptStep::GoogleToken => "google id token:".to_owned(),
        }
    }

    pub fn answer(&mut self, input: &str) -> PromptOutcome {
        let input = input.trim();
        if input.is_empty() || input.eq_ignore_ascii_case("cancel") {
            return PromptOutcome::Cancelled;
        }
        let next = match std::mem::replace(&mut self.step, PromptStep::Method) {
            PromptStep::Method => match self.pick_provider(input) {
                Some(IdpProvider::Email) => PromptStep::Email,
                Some(IdpProvider::Google) => PromptStep::GoogleToken,
                None => PromptStep::Method,
            },
            PromptStep::Email => PromptStep::Password { email: input.to_owned() },
            PromptStep::Password { email } => {
                return PromptOutcome::Done(Credentials::EmailPassword { email, password: input.to_owned() });
            }
            PromptStep::GoogleToken => {
                return PromptOutcome::Done(Credentials::Federated {
                    provider: IdpProvider::Google,
                    id_token: input.to_owned(),
                });
            }
        };
        self.step = next;
        PromptOutcome::Ask(self.question())
    }

    fn pick_provider(&self, input: &str) -> Option<IdpProvider> {
        if let Ok(n) = input.parse::<usize>() {
            return n.checked_sub(1).and_then(|i| self.providers.get(i)).copied();
        }
        self.providers
            .iter()
            .copied()
            .find(|p| p.label().eq_ignore_ascii_case(input))
    }
}

/// Collapse a sign-in attempt into what the screen is told.
#[must_use]
pub fn sign_in_result(result: &Result<User, BackendError>) -> SignInResult {
    match result {
        Ok(_) => SignInResult::Success,
        Err(BackendError::Auth(code)) => SignInResult::Failed(code.clone()),
        Err(e) => SignInResult::Failed(e.to_string()),
    }
}

// =============================================================================
// HOST
// =============================================================================

pub struct Host<W: Write> {
    out: W,
    auth: Arc<dyn AuthService>,
    preset: Option<Credentials>,
    prompt: Option<SignInPrompt>,
    picked: Option<PathBuf>,
    sign_in: Option<JoinHandle<SignInResult>>,
    quit: bool,
}

impl<W: Write> Host<W> {
    /// `preset` credentials are used for the first sign-in instead of prompting.
    pub fn new(out: W, auth: Arc<dyn AuthService>, preset: Option<Credentials>) -> Self {
        Self { out, auth, preset, prompt: None, picked: None, sign_in: None, quit: false }
    }

    #[must_use]
    pub fn should_quit(&self) -> bool {
        self.quit
    }

    #[must_use]
    pub fn is_prompting(&self) -> bool {
        self.prompt.is_some()
    }

    #[must_use]
    pub fn output(&self) -> &W {
        &self.out
    }

    /// Route one stdin line to the prompt or the screen.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to the output fails.
    pub fn on_line(&mut self, screen: &mut ChatScreen, line: &str) -> io::Result<()> {
        if let Some(prompt) = self.prompt.as_mut() {
            match prompt.answer(line) {
                PromptOutcome::Ask(question) => writeln!(self.out, "{question}")?,
                PromptOutcome::Done(credentials) => {
                    self.prompt = None;
                    self.start_sign_in(credentials);
                }
                PromptOutcome::Cancelled => {
                    self.prompt = None;
                    screen.on_sign_in_result(SignInResult::Cancelled);
                }
            }
            return Ok(());
        }

        match parse_command(line) {
            Command::Empty => {}
            Command::Send(text) => {
                let typed = text.chars().count();
                screen.on_text_changed(&text);
                let max = screen.composer().max_length();
                if typed > max {
                    writeln!(self.out, "* message truncated to {max} characters")?;
                }
                screen.on_send_clicked();
            }
            Command::Photo(path) => {
                self.picked = Some(path);
                screen.on_photo_picker_clicked();
            }
            Command::SignOut => {
                screen.on_menu_item_selected(MenuItem::SignOut);
            }
            Command::Quit => self.quit = true,
            Command::Help => writeln!(self.out, "{HELP}")?,
            Command::Invalid(reason) => writeln!(self.out, "* {reason}")?,
        }
        Ok(())
    }

    /// Render and act on every queued screen effect.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to the output fails.
    pub fn apply_effects(&mut self, screen: &mut ChatScreen) -> io::Result<()> {
        // Acting on an effect can queue more (a rejected pick, a cancelled prompt).
        loop {
            let effects = screen.drain_effects();
            if effects.is_empty() {
                return Ok(());
            }
            for effect in effects {
                self.apply(screen, effect)?;
            }
        }
    }

    fn apply(&mut self, screen: &mut ChatScreen, effect: Effect) -> io::Result<()> {
        match effect {
            Effect::Notice(text) => writeln!(self.out, "* {text}")?,
            Effect::MessageAdded(index) => {
                if let Some(row) = screen.adapter().row(index) {
                    writeln!(self.out, "{}", render_row(row))?;
                }
            }
            Effect::MessagesCleared => writeln!(self.out, "* conversation cleared")?,
            Effect::LaunchSignIn { providers } => {
                if let Some(credentials) = self.preset.take() {
                    info!("terminal: signing in with preset credentials");
                    self.start_sign_in(credentials);
                } else {
                    let prompt = SignInPrompt::new(providers);
                    writeln!(self.out, "{}", prompt.question())?;
                    self.prompt = Some(prompt);
                }
            }
            Effect::LaunchImagePicker(request) => {
                let result = self.pick(&request);
                if result == PickResult::Cancelled {
                    writeln!(self.out, "* pick a local .jpg file")?;
                }
                screen.on_image_picked(result);
            }
            Effect::Finish => self.quit = true,
        }
        Ok(())
    }

    fn pick(&mut self, request: &PickerRequest) -> PickResult {
        let Some(path) = self.picked.take() else {
            return PickResult::Cancelled;
        };
        if !request.accepts(&path) || (request.local_only && !path.is_file()) {
            debug!(path = %path.display(), "terminal: picked file rejected");
            return PickResult::Cancelled;
        }
        PickResult::Picked(LocalImage { path, content_type: request.mime_type.to_owned() })
    }

    fn start_sign_in(&mut self, credentials: Credentials) {
        let auth = self.auth.clone();
        self.sign_in = Some(tokio::spawn(async move { sign_in_result(&auth.sign_in(credentials).await) }));
    }
}

/// Resolves when the in-flight sign-in finishes; pending forever if none.
async fn sign_in_finished(task: &mut Option<JoinHandle<SignInResult>>) -> SignInResult {
    let Some(handle) = task.as_mut() else {
        return std::future::pending().await;
    };
    let result = handle.await.unwrap_or_else(|e| SignInResult::Failed(e.to_string()));
    *task = None;
    result
}

// =============================================================================
// LOOP
// =============================================================================

/// Run the chat screen against stdin/stdout until quit, EOF, or finish.
///
/// # Errors
///
/// Returns an error if stdin or stdout fails.
pub async fn run(backend: Backend, settings: ScreenSettings, preset: Option<Credentials>) -> io::Result<()> {
    let auth = backend.auth.clone();
    let (mut screen, mut events) = ChatScreen::new(backend, settings);
    let mut host = Host::new(io::stdout(), auth, preset);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    writeln!(host.out, "{HELP}")?;
    screen.on_create();
    screen.on_resume();

    loop {
        host.apply_effects(&mut screen)?;
        host.out.flush()?;
        if host.should_quit() || screen.is_finished() {
            break;
        }
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => host.on_line(&mut screen, &line)?,
                None => {
                    debug!("terminal: stdin closed");
                    break;
                }
            },
            Some(event) = events.next() => screen.handle_event(event),
            result = sign_in_finished(&mut host.sign_in) => screen.on_sign_in_result(result),
        }
    }

    screen.on_pause();
    info!("terminal: screen closed");
    Ok(())
}

#[cfg(test)]
#[path = "terminal_test.rs"]
mod tests;
