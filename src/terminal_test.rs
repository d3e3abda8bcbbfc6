use std::time::Duration;

use super::*;
use crate::backend::memory::MemoryBackend;
use crate::message::Message;
use crate::screen::ScreenEvents;

// =========================================================================
// parse_command / render_row
// =========================================================================

#[test]
fn parse_plain_text_keeps_spacing() {
    assert_eq!(parse_command("  hello world\n"), Command::Send("  hello world".into()));
}

#[test]
fn parse_slash_commands() {
    assert_eq!(parse_command("/photo /tmp/cat.jpg"), Command::Photo(PathBuf::from("/tmp/cat.jpg")));
    assert_eq!(parse_command("/signout"), Command::SignOut);
    assert_eq!(parse_command("/quit"), Command::Quit);
    assert_eq!(parse_command("/exit"), Command::Quit);
    assert_eq!(parse_command("/help"), Command::Help);
    assert_eq!(parse_command("   "), Command::Empty);
    assert!(matches!(parse_command("/photo"), Command::Invalid(_)));
    assert!(matches!(parse_command("/dance"), Command::Invalid(_)));
}

#[test]
fn render_rows() {
    let text = Message::text("hi", "Alice");
    let photo = Message::photo("https://x/y.jpg", "Bob");
    assert_eq!(render_row(MessageRow::from_message(&text)), "Alice: hi");
    assert_eq!(render_row(MessageRow::from_message(&photo)), "Bob: [photo] https://x/y.jpg");
}

// =========================================================================
// SignInPrompt
// =========================================================================

#[test]
fn prompt_email_flow() {
    let mut prompt = SignInPrompt::new(vec![IdpProvider::Email, IdpProvider::Google]);
    assert!(prompt.question().contains("1) email"));
    assert_eq!(prompt.answer("1"), PromptOutcome::Ask("email:".into()));
    assert_eq!(prompt.answer("alice@example.com"), PromptOutcome::Ask("password:".into()));
    assert_eq!(
        prompt.answer("secret"),
        PromptOutcome::Done(Credentials::EmailPassword { email: "alice@example.com".into(), password: "secret".into() })
    );
}

#[test]
fn prompt_google_flow_by_name() {
    let mut prompt = SignInPrompt::new(vec![IdpProvider::Email, IdpProvider::Google]);
    assert_eq!(prompt.answer("Google"), PromptOutcome::Ask("google id token:".into()));
    assert_eq!(
        prompt.answer("eyJ..."),
        PromptOutcome::Done(Credentials::Federated { provider: IdpProvider::Google, id_token: "eyJ...".into() })
    );
}

#[test]
fn prompt_unknown_choice_asks_again() {
    let mut prompt = SignInPrompt::new(vec![IdpProvider::Email, IdpProvider::Google]);
    let first = prompt.question();
    assert_eq!(prompt.answer("7"), PromptOutcome::Ask(first.clone()));
    assert_eq!(prompt.answer("github"), PromptOutcome::Ask(first));
}

#[test]
fn prompt_blank_or_cancel_cancels_any_step() {
    let mut prompt = SignInPrompt::new(vec![IdpProvider::Email, IdpProvider::Google]);
    assert_eq!(prompt.answer(""), PromptOutcome::Cancelled);

    let mut prompt = SignInPrompt::new(vec![IdpProvider::Email]);
    assert_eq!(prompt.question(), "email:");
    assert_eq!(prompt.answer("a@b.c"), PromptOutcome::Ask("password:".into()));
    assert_eq!(prompt.answer("CANCEL"), PromptOutcome::Cancelled);
}

#[test]
fn sign_in_result_mapping() {
    let user = User { uid: "u".into(), display_name: None, email: None };
    assert_eq!(sign_in_result(&Ok(user)), SignInResult::Success);
    assert_eq!(
        sign_in_result(&Err(BackendError::Auth("INVALID_PASSWORD".into()))),
        SignInResult::Failed("INVALID_PASSWORD".into())
    );
    assert!(matches!(sign_in_result(&Err(BackendError::Request("down".into()))), SignInResult::Failed(_)));
}

// =========================================================================
// Host
// =========================================================================

struct Rig {
    memory: MemoryBackend,
    screen: ChatScreen,
    events: ScreenEvents,
    host: Host<Vec<u8>>,
}

impl Rig {
    fn new(preset: Option<Credentials>) -> Self {
        let memory = MemoryBackend::new();
        memory
            .auth
            .register_password("alice@example.com", "pw", Some("Alice"));
        let backend = memory.backend();
        let host = Host::new(Vec::new(), backend.auth.clone(), preset);
        let settings = ScreenSettings { developer_mode: true, ..ScreenSettings::default() };
        let (screen, events) = ChatScreen::new(backend, settings);
        Self { memory, screen, events, host }
    }

    /// Drive the loop (minus stdin) until nothing happens for a while.
    async fn settle(&mut self) {
        loop {
            self.host.apply_effects(&mut self.screen).unwrap();
            let idle = Duration::from_millis(10);
            tokio::select! {
                Some(event) = self.events.next() => self.screen.handle_event(event),
                result = sign_in_finished(&mut self.host.sign_in) => self.screen.on_sign_in_result(result),
                () = tokio::time::sleep(idle) => break,
            }
        }
        self.host.apply_effects(&mut self.screen).unwrap();
    }

    async fn line(&mut self, line: &str) {
        self.host.on_line(&mut self.screen, line).unwrap();
        self.settle().await;
    }

    fn output(&self) -> String {
        String::from_utf8_lossy(self.host.output()).into_owned()
    }
}

fn alice() -> Credentials {
    Credentials::EmailPassword { email: "alice@example.com".into(), password: "pw".into() }
}

#[tokio::test(start_paused = true)]
async fn preset_credentials_skip_the_prompt() {
    let mut rig = Rig::new(Some(alice()));
    rig.screen.on_resume();
    rig.settle().await;

    assert!(!rig.host.is_prompting());
    assert_eq!(rig.screen.username(), "Alice");
    assert!(rig.output().contains("* Signed in successfully"));
}

#[tokio::test(start_paused = true)]
async fn prompt_signs_in_then_chat_round_trips() {
    let mut rig = Rig::new(None);
    rig.screen.on_resume();
    rig.settle().await;
    assert!(rig.host.is_prompting());

    rig.line("email").await;
    rig.line("alice@example.com").await;
    rig.line("pw").await;
    assert!(!rig.host.is_prompting());
    assert_eq!(rig.screen.username(), "Alice");

    rig.line("hello there").await;
    assert_eq!(rig.memory.messages.messages(), vec![Message::text("hello there", "Alice")]);
    assert!(rig.output().contains("Alice: hello there"));
}

#[tokio::test(start_paused = true)]
async fn wrong_password_prompts_again() {
    let mut rig = Rig::new(Some(Credentials::EmailPassword {
        email: "alice@example.com".into(),
        password: "nope".into(),
    }));
    rig.screen.on_resume();
    rig.settle().await;

    assert!(rig.host.is_prompting());
    assert_eq!(rig.screen.username(), crate::screen::ANONYMOUS);
    assert!(!rig.output().contains("Signed in successfully"));
}

#[tokio::test(start_paused = true)]
async fn cancelled_prompt_quits() {
    let mut rig = Rig::new(None);
    rig.screen.on_resume();
    rig.settle().await;

    rig.line("").await;
    assert!(rig.host.should_quit());
    assert!(rig.screen.is_finished());
    assert!(rig.output().contains("* Sign in cancelled"));
}

#[tokio::test(start_paused = true)]
async fn photo_of_missing_file_is_rejected() {
    let mut rig = Rig::new(Some(alice()));
    rig.screen.on_resume();
    rig.settle().await;

    rig.line("/photo /definitely/not/here.jpg").await;
    assert!(rig.memory.photos.uploads().is_empty());
    assert!(rig.output().contains("* pick a local .jpg file"));
}

#[tokio::test(start_paused = true)]
async fn photo_of_local_jpeg_is_posted() {
    let dir = std::env::temp_dir().join(format!("friendlychat-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("sunset.jpg");
    std::fs::write(&path, b"\xFF\xD8\xFF\xE0").unwrap();

    let mut rig = Rig::new(Some(alice()));
    rig.screen.on_resume();
    rig.settle().await;
    rig.line(&format!("/photo {}", path.display())).await;

    assert_eq!(rig.memory.photos.uploads(), vec!["chat_photos/sunset.jpg".to_owned()]);
    assert!(rig.output().contains("Alice: [photo] memory://photos/chat_photos/sunset.jpg"));
    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test(start_paused = true)]
async fn signout_command_returns_to_prompt() {
    let mut rig = Rig::new(Some(alice()));
    rig.screen.on_resume();
    rig.settle().await;

    rig.line("/signout").await;
    assert!(rig.host.is_prompting());
    assert!(!rig.screen.has_subscription());
}

#[tokio::test(start_paused = true)]
async fn quit_and_help_commands() {
    let mut rig = Rig::new(Some(alice()));
    rig.line("/help").await;
    assert!(rig.output().contains("/photo"));
    rig.line("/quit").await;
    assert!(rig.host.should_quit());
}
