use std::path::PathBuf;
use chrono::Local;
use ratatui::layout::Rect;
use ratatui::widgets::ListState;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::{ApiClient, HistoryMessage};
use crate::channel::{ChannelConnector, ChannelEvent, ChatSink, OutgoingEvent, MAX_RECONNECT_ATTEMPTS};
use crate::config::Config;
use crate::event::{ClientEvent, UploadEvent};
use crate::picker::{self, FileEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Upload,
    Chat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Idle,
    Uploading,
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting(u32),
    Failed,
}

impl ConnectionStatus {
    pub fn label(&self) -> String {
        match self {
            ConnectionStatus::Disconnected => "disconnected".to_string(),
            ConnectionStatus::Connecting => "connecting...".to_string(),
            ConnectionStatus::Connected => "connected".to_string(),
            ConnectionStatus::Reconnecting(n) => {
                format!("reconnecting ({}/{})", n, MAX_RECONNECT_ATTEMPTS)
            }
            ConnectionStatus::Failed => "offline".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    User,
    Bot,
}

impl MessageKind {
    fn from_wire(kind: &str) -> Self {
        match kind {
            "user" => MessageKind::User,
            _ => MessageKind::Bot,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub content: String,
    pub kind: MessageKind,
    pub timestamp: String,
}

impl From<HistoryMessage> for ChatMessage {
    fn from(msg: HistoryMessage) -> Self {
        ChatMessage {
            kind: MessageKind::from_wire(&msg.kind),
            content: msg.content,
            timestamp: msg.timestamp,
        }
    }
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub screen: Screen,
    pub input_mode: InputMode,

    // Root state: the one piece of shared state. The chat screen is
    // reachable only while this is Some.
    pub pdf_id: Option<String>,

    // Picker state
    pub current_dir: PathBuf,
    pub entries: Vec<FileEntry>,
    pub picker_state: ListState,

    // Upload state
    pub upload_status: UploadStatus,
    pub upload_progress: u8,
    pub upload_error: Option<String>,
    upload_task: Option<JoinHandle<()>>,
    upload_generation: u64,

    // Chat state
    pub messages: Vec<ChatMessage>,
    pub chat_input: String,
    pub chat_cursor: usize,
    pub waiting: bool,
    pub chat_error: Option<String>,
    pub connection_error: Option<String>,
    pub history_error: Option<String>,
    pub history_loading: bool,
    pub connection: ConnectionStatus,
    pub chat_scroll: u16,
    pub chat_height: u16,
    pub chat_width: u16,

    // Panel areas for mouse hit-testing (updated during render)
    pub picker_area: Option<Rect>,
    pub chat_area: Option<Rect>,

    // Animation state
    pub animation_frame: u8,

    // Collaborators
    api: ApiClient,
    connector: Box<dyn ChannelConnector>,
    channel: Option<Box<dyn ChatSink>>,
    channel_generation: u64,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl App {
    pub fn new(
        config: &Config,
        connector: Box<dyn ChannelConnector>,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> anyhow::Result<Self> {
        let api = ApiClient::new(&config.server_url());

        let current_dir = match config.start_dir.clone() {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };
        let entries = picker::list_dir(&current_dir)?;

        let mut picker_state = ListState::default();
        if !entries.is_empty() {
            picker_state.select(Some(0));
        }

        Ok(Self {
            should_quit: false,
            screen: Screen::Upload,
            input_mode: InputMode::Normal,

            pdf_id: None,

            current_dir,
            entries,
            picker_state,

            upload_status: UploadStatus::Idle,
            upload_progress: 0,
            upload_error: None,
            upload_task: None,
            upload_generation: 0,

            messages: Vec::new(),
            chat_input: String::new(),
            chat_cursor: 0,
            waiting: false,
            chat_error: None,
            connection_error: None,
            history_error: None,
            history_loading: false,
            connection: ConnectionStatus::Disconnected,
            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,

            picker_area: None,
            chat_area: None,

            animation_frame: 0,

            api,
            connector,
            channel: None,
            channel_generation: 0,
            events,
        })
    }

    /// Route a background-task event into the matching state update.
    pub fn apply(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Upload { generation, event } => self.on_upload_event(generation, event),
            ClientEvent::History { pdf_id, result } => self.on_history(pdf_id, result),
            ClientEvent::Channel { generation, event } => self.on_channel_event(generation, event),
        }
    }

    // Picker navigation

    pub fn selected_entry(&self) -> Option<&FileEntry> {
        self.picker_state.selected().and_then(|i| self.entries.get(i))
    }

    pub fn picker_nav_down(&mut self) {
        let len = self.entries.len();
        if len > 0 {
            let i = self.picker_state.selected().unwrap_or(0);
            self.picker_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn picker_nav_up(&mut self) {
        let i = self.picker_state.selected().unwrap_or(0);
        self.picker_state.select(Some(i.saturating_sub(1)));
    }

    pub fn picker_nav_first(&mut self) {
        if !self.entries.is_empty() {
            self.picker_state.select(Some(0));
        }
    }

    pub fn picker_nav_last(&mut self) {
        let len = self.entries.len();
        if len > 0 {
            self.picker_state.select(Some(len - 1));
        }
    }

    pub fn refresh_entries(&mut self) {
        match picker::list_dir(&self.current_dir) {
            Ok(entries) => {
                self.entries = entries;
                let selected = self.picker_state.selected().unwrap_or(0);
                if self.entries.is_empty() {
                    self.picker_state.select(None);
                } else {
                    self.picker_state
                        .select(Some(selected.min(self.entries.len() - 1)));
                }
            }
            Err(e) => {
                self.upload_error = Some(format!("Could not read directory: {}", e));
            }
        }
    }

    /// Enter on a picker row: descend into directories, upload files.
    pub fn enter_selected(&mut self) {
        let Some(entry) = self.selected_entry().cloned() else {
            return;
        };
        if entry.is_dir {
            self.current_dir = entry.path;
            self.picker_state.select(Some(0));
            self.refresh_entries();
        } else {
            self.start_upload(entry);
        }
    }

    pub fn leave_dir(&mut self) {
        if let Some(parent) = self.current_dir.parent() {
            self.current_dir = parent.to_path_buf();
            self.picker_state.select(Some(0));
            self.refresh_entries();
        }
    }

    // Upload flow

    pub fn start_upload(&mut self, entry: FileEntry) {
        if self.upload_status == UploadStatus::Uploading {
            self.upload_error = Some("Upload in progress, please wait".to_string());
            return;
        }

        if let Err(message) = picker::validate_pdf(&entry) {
            self.upload_error = Some(message);
            return;
        }

        self.upload_error = None;
        self.upload_status = UploadStatus::Uploading;
        self.upload_progress = 0;
        self.upload_generation += 1;

        let generation = self.upload_generation;
        let api = self.api.clone();
        let events = self.events.clone();
        let path = entry.path;

        self.upload_task = Some(tokio::spawn(async move {
            let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();

            let forward_to = events.clone();
            let forward = tokio::spawn(async move {
                while let Some(percent) = progress_rx.recv().await {
                    let _ = forward_to.send(ClientEvent::Upload {
                        generation,
                        event: UploadEvent::Progress(percent),
                    });
                }
            });

            let result = api
                .upload_pdf(&path, progress_tx)
                .await
                .map_err(|e| e.to_string());

            // The progress sender is gone once the request body is
            // consumed, so this preserves progress-before-finished order.
            let _ = forward.await;
            let _ = events.send(ClientEvent::Upload {
                generation,
                event: UploadEvent::Finished(result),
            });
        }));
    }

    pub fn cancel_upload(&mut self) {
        if self.upload_status != UploadStatus::Uploading {
            return;
        }
        if let Some(task) = self.upload_task.take() {
            task.abort();
        }
        self.upload_generation += 1;
        self.upload_status = UploadStatus::Idle;
        self.upload_progress = 0;
        self.upload_error = Some("Upload cancelled".to_string());
    }

    fn on_upload_event(&mut self, generation: u64, event: UploadEvent) {
        if generation != self.upload_generation {
            return;
        }
        match event {
            UploadEvent::Progress(percent) => {
                if self.upload_status == UploadStatus::Uploading {
                    self.upload_progress = percent;
                }
            }
            UploadEvent::Finished(Ok(response)) => {
                self.upload_task = None;
                self.upload_status = UploadStatus::Success;
                self.upload_progress = 100;
                self.upload_error = None;
                if let Some(message) = &response.message {
                    log::info!("upload finished: {}", message);
                }
                self.attach_document(response.pdf_id);
            }
            UploadEvent::Finished(Err(message)) => {
                self.upload_task = None;
                self.upload_status = UploadStatus::Error;
                self.upload_error = Some(message);
            }
        }
    }

    // Root state

    /// Make `pdf_id` the active document. A new identifier remounts the
    /// chat panel: history, channel, and message list all start over.
    pub fn attach_document(&mut self, pdf_id: String) {
        if self.pdf_id.as_deref() == Some(pdf_id.as_str()) {
            self.screen = Screen::Chat;
            return;
        }

        self.teardown_channel();
        self.pdf_id = Some(pdf_id);
        self.messages.clear();
        self.waiting = false;
        self.chat_error = None;
        self.connection_error = None;
        self.history_error = None;
        self.chat_scroll = 0;
        self.screen = Screen::Chat;

        self.fetch_history();
        self.open_channel();
    }

    // History

    pub fn fetch_history(&mut self) {
        let Some(pdf_id) = self.pdf_id.clone() else {
            return;
        };
        self.history_loading = true;
        self.history_error = None;

        let api = self.api.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = api.chat_history(&pdf_id).await.map_err(|e| {
                log::warn!("history fetch for {} failed: {}", pdf_id, e);
                "Failed to load chat history".to_string()
            });
            let _ = events.send(ClientEvent::History { pdf_id, result });
        });
    }

    fn on_history(&mut self, pdf_id: String, result: Result<Vec<HistoryMessage>, String>) {
        if self.pdf_id.as_deref() != Some(pdf_id.as_str()) {
            return;
        }
        self.history_loading = false;
        match result {
            Ok(history) => {
                // Prepend: a message sent before a slow history response
                // arrived must not be lost.
                let mut messages: Vec<ChatMessage> =
                    history.into_iter().map(ChatMessage::from).collect();
                messages.append(&mut self.messages);
                self.messages = messages;
                self.history_error = None;
                self.scroll_chat_to_bottom();
            }
            Err(message) => {
                self.history_error = Some(message);
            }
        }
    }

    // Channel lifecycle

    fn open_channel(&mut self) {
        self.channel_generation += 1;
        self.connection = ConnectionStatus::Connecting;
        self.channel = Some(
            self.connector
                .connect(self.channel_generation, self.events.clone()),
        );
    }

    /// Close the channel and fence off any events still in flight.
    pub fn teardown_channel(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.disconnect();
        }
        self.channel_generation += 1;
        self.connection = ConnectionStatus::Disconnected;
    }

    fn on_channel_event(&mut self, generation: u64, event: ChannelEvent) {
        if generation != self.channel_generation {
            return;
        }
        match event {
            ChannelEvent::Connected => {
                self.connection = ConnectionStatus::Connected;
                self.connection_error = None;
                if let (Some(pdf_id), Some(channel)) = (self.pdf_id.clone(), self.channel.as_ref())
                {
                    if let Err(e) = channel.emit(OutgoingEvent::Join { pdf_id }) {
                        self.connection_error = Some(format!("Connection error: {}", e));
                    }
                }
            }
            ChannelEvent::Disconnected => {
                self.connection = ConnectionStatus::Disconnected;
                self.connection_error = Some("Connection lost".to_string());
            }
            ChannelEvent::ConnectError(message) => {
                self.connection_error = Some(format!("Connection error: {}", message));
            }
            ChannelEvent::ReconnectAttempt(attempt) => {
                self.connection = ConnectionStatus::Reconnecting(attempt);
                self.connection_error = Some(format!(
                    "Connection lost, reconnecting ({}/{})",
                    attempt, MAX_RECONNECT_ATTEMPTS
                ));
            }
            ChannelEvent::Reconnected => {
                // A Connected event follows and does the join.
            }
            ChannelEvent::ReconnectFailed => {
                self.connection = ConnectionStatus::Failed;
                self.connection_error = Some(
                    "Connection lost. Could not reconnect, please restart the chat.".to_string(),
                );
            }
            ChannelEvent::ChatResponse {
                pdf_id,
                response,
                timestamp,
            } => {
                if self.pdf_id.as_deref() == Some(pdf_id.as_str()) {
                    self.messages.push(ChatMessage {
                        content: response,
                        kind: MessageKind::Bot,
                        timestamp,
                    });
                    self.waiting = false;
                    self.scroll_chat_to_bottom();
                }
            }
            ChannelEvent::ServerError { message } => {
                self.chat_error = Some(message);
                self.waiting = false;
            }
        }
    }

    // Sending

    pub fn send_message(&mut self) {
        if self.chat_input.trim().is_empty() {
            return;
        }
        let Some(pdf_id) = self.pdf_id.clone() else {
            return;
        };
        if self.connection != ConnectionStatus::Connected || self.waiting {
            return;
        }
        if self.channel.is_none() {
            return;
        }

        let content = std::mem::take(&mut self.chat_input);
        self.chat_cursor = 0;
        self.messages.push(ChatMessage {
            content: content.clone(),
            kind: MessageKind::User,
            timestamp: Local::now().to_rfc3339(),
        });
        self.waiting = true;
        self.chat_error = None;
        self.scroll_chat_to_bottom();

        let channel = self.channel.as_ref().expect("channel presence checked above");
        if let Err(e) = channel.emit(OutgoingEvent::ChatMessage {
            pdf_id,
            message: content,
        }) {
            self.waiting = false;
            self.connection_error = Some(format!("Connection error: {}", e));
        }
    }

    // Chat scrolling

    pub fn scroll_chat_up(&mut self) {
        self.chat_scroll = self.chat_scroll.saturating_sub(1);
    }

    pub fn scroll_chat_down(&mut self) {
        let max_scroll = self.chat_line_count().saturating_sub(self.chat_height);
        if self.chat_scroll < max_scroll {
            self.chat_scroll = self.chat_scroll.saturating_add(1);
        }
    }

    /// Rendered line count of the chat transcript at the current width,
    /// mirroring the wrap math in the chat view.
    fn chat_line_count(&self) -> u16 {
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total: u16 = 0;
        for msg in &self.messages {
            total += 1; // header line
            for line in msg.content.lines() {
                let char_count = line.chars().count();
                if char_count == 0 {
                    total += 1;
                } else {
                    total += ((char_count / wrap_width) + 1) as u16;
                }
            }
            total += 1; // blank line after message
        }
        if self.waiting {
            total += 2; // header + "Thinking..."
        }
        total
    }

    pub fn scroll_chat_to_bottom(&mut self) {
        let total = self.chat_line_count();
        let visible = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };
        self.chat_scroll = total.saturating_sub(visible);
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.waiting {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    // Teardown on quit

    pub fn shutdown(&mut self) {
        self.teardown_channel();
        if let Some(task) = self.upload_task.take() {
            task.abort();
        }
        self.upload_generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::UploadResponse;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct ChannelProbe {
        emitted: Arc<Mutex<Vec<OutgoingEvent>>>,
        connects: Arc<AtomicUsize>,
        disconnects: Arc<AtomicUsize>,
    }

    impl ChannelProbe {
        fn emitted(&self) -> Vec<OutgoingEvent> {
            self.emitted.lock().unwrap().clone()
        }
    }

    struct ProbeSink(ChannelProbe);

    impl ChatSink for ProbeSink {
        fn emit(&self, event: OutgoingEvent) -> anyhow::Result<()> {
            self.0.emitted.lock().unwrap().push(event);
            Ok(())
        }

        fn disconnect(&self) {
            self.0.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl ChannelConnector for ChannelProbe {
        fn connect(
            &self,
            _generation: u64,
            _events: mpsc::UnboundedSender<ClientEvent>,
        ) -> Box<dyn ChatSink> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Box::new(ProbeSink(self.clone()))
        }
    }

    struct Fixture {
        app: App,
        rx: mpsc::UnboundedReceiver<ClientEvent>,
        probe: ChannelProbe,
        _dir: tempfile::TempDir,
    }

    fn fixture_with_server(server_url: Option<String>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            server_url,
            start_dir: Some(dir.path().to_path_buf()),
        };
        let probe = ChannelProbe::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let app = App::new(&config, Box::new(probe.clone()), tx).unwrap();
        Fixture {
            app,
            rx,
            probe,
            _dir: dir,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_server(None)
    }

    fn pdf_entry(dir: &std::path::Path, name: &str, bytes: usize) -> FileEntry {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&vec![b'x'; bytes]).unwrap();
        FileEntry {
            name: name.to_string(),
            path,
            is_dir: false,
            size: bytes as u64,
        }
    }

    fn connect_chat(fx: &mut Fixture, pdf_id: &str) {
        fx.app.attach_document(pdf_id.to_string());
        let generation = fx.app.channel_generation;
        fx.app.apply(ClientEvent::Channel {
            generation,
            event: ChannelEvent::Connected,
        });
    }

    #[tokio::test]
    async fn non_pdf_selection_shows_type_error_and_spawns_nothing() {
        let mut fx = fixture();
        let entry = pdf_entry(fx._dir.path(), "notes.txt", 16);

        fx.app.start_upload(entry);

        assert_eq!(fx.app.upload_status, UploadStatus::Idle);
        assert_eq!(fx.app.upload_error.as_deref(), Some("Please upload a PDF file"));
        assert!(fx.app.upload_task.is_none());
        assert!(fx.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn oversized_pdf_shows_size_error_and_spawns_nothing() {
        let mut fx = fixture();
        let mut entry = pdf_entry(fx._dir.path(), "big.pdf", 16);
        entry.size = picker::MAX_PDF_BYTES + 1;

        fx.app.start_upload(entry);

        assert_eq!(fx.app.upload_status, UploadStatus::Idle);
        assert_eq!(
            fx.app.upload_error.as_deref(),
            Some("File size should not exceed 10MB")
        );
        assert!(fx.app.upload_task.is_none());
        assert!(fx.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn second_selection_during_upload_is_rejected() {
        let mut fx = fixture();
        fx.app.upload_status = UploadStatus::Uploading;

        let entry = pdf_entry(fx._dir.path(), "test.pdf", 16);
        fx.app.start_upload(entry);

        assert_eq!(
            fx.app.upload_error.as_deref(),
            Some("Upload in progress, please wait")
        );
        assert!(fx.app.upload_task.is_none());
        assert!(fx.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn upload_flow_attaches_document_and_fetches_history_once() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/upload"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "message": "File uploaded successfully",
                "pdf_id": "abc"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/chat/abc/history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [
                    { "content": "Hello", "type": "user", "timestamp": "2023-01-01T12:00:00Z" }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut fx = fixture_with_server(Some(server.uri()));
        let entry = pdf_entry(fx._dir.path(), "test.pdf", 2048);

        fx.app.start_upload(entry);
        assert_eq!(fx.app.upload_status, UploadStatus::Uploading);
        assert_eq!(fx.app.upload_progress, 0);

        // Drain events until both the upload result and the history
        // response have been applied.
        let mut saw_finish = false;
        let mut saw_history = false;
        while !(saw_finish && saw_history) {
            let event = tokio::time::timeout(Duration::from_secs(5), fx.rx.recv())
                .await
                .expect("timed out waiting for client events")
                .expect("event channel closed");
            match &event {
                ClientEvent::Upload {
                    event: UploadEvent::Finished(_),
                    ..
                } => saw_finish = true,
                ClientEvent::History { .. } => saw_history = true,
                _ => {}
            }
            fx.app.apply(event);
        }

        assert_eq!(fx.app.upload_status, UploadStatus::Success);
        assert_eq!(fx.app.upload_progress, 100);
        assert_eq!(fx.app.pdf_id.as_deref(), Some("abc"));
        assert_eq!(fx.app.screen, Screen::Chat);
        assert_eq!(fx.probe.connects.load(Ordering::SeqCst), 1);
        assert_eq!(fx.app.messages.len(), 1);
        assert_eq!(fx.app.messages[0].content, "Hello");
        assert_eq!(fx.app.messages[0].kind, MessageKind::User);
    }

    #[tokio::test]
    async fn upload_error_body_is_shown_and_form_recovers() {
        let mut fx = fixture();
        fx.app.upload_status = UploadStatus::Uploading;
        let generation = fx.app.upload_generation;

        fx.app.apply(ClientEvent::Upload {
            generation,
            event: UploadEvent::Finished(Err("No file selected".to_string())),
        });

        assert_eq!(fx.app.upload_status, UploadStatus::Error);
        assert_eq!(fx.app.upload_error.as_deref(), Some("No file selected"));
        assert!(fx.app.pdf_id.is_none());

        // A fresh selection goes through again.
        let entry = pdf_entry(fx._dir.path(), "other.txt", 4);
        fx.app.start_upload(entry);
        assert_eq!(fx.app.upload_error.as_deref(), Some("Please upload a PDF file"));
    }

    #[tokio::test]
    async fn cancelled_upload_ignores_late_events() {
        let mut fx = fixture();
        fx.app.upload_status = UploadStatus::Uploading;
        let stale = fx.app.upload_generation;

        fx.app.cancel_upload();
        assert_eq!(fx.app.upload_status, UploadStatus::Idle);
        assert_eq!(fx.app.upload_error.as_deref(), Some("Upload cancelled"));

        fx.app.apply(ClientEvent::Upload {
            generation: stale,
            event: UploadEvent::Finished(Ok(UploadResponse {
                message: None,
                pdf_id: "late".to_string(),
            })),
        });
        assert_eq!(fx.app.upload_status, UploadStatus::Idle);
        assert!(fx.app.pdf_id.is_none());
    }

    #[tokio::test]
    async fn send_is_ignored_without_input_document_or_connection() {
        let mut fx = fixture();

        // No input.
        connect_chat(&mut fx, "abc");
        fx.app.send_message();
        assert!(fx
            .probe
            .emitted()
            .iter()
            .all(|e| matches!(e, OutgoingEvent::Join { .. })));

        // Whitespace input.
        fx.app.chat_input = "   ".to_string();
        fx.app.send_message();
        assert_eq!(fx.app.messages.len(), 0);

        // Disconnected channel.
        fx.app.chat_input = "hello".to_string();
        let generation = fx.app.channel_generation;
        fx.app.apply(ClientEvent::Channel {
            generation,
            event: ChannelEvent::Disconnected,
        });
        fx.app.send_message();
        assert_eq!(fx.app.messages.len(), 0);
        assert!(fx
            .probe
            .emitted()
            .iter()
            .all(|e| matches!(e, OutgoingEvent::Join { .. })));
    }

    #[tokio::test]
    async fn send_appends_optimistically_and_emits_once() {
        let mut fx = fixture();
        connect_chat(&mut fx, "abc");

        fx.app.chat_input = "what is this about?".to_string();
        fx.app.chat_cursor = fx.app.chat_input.chars().count();
        fx.app.send_message();

        assert_eq!(fx.app.messages.len(), 1);
        assert_eq!(fx.app.messages[0].kind, MessageKind::User);
        assert_eq!(fx.app.messages[0].content, "what is this about?");
        assert!(fx.app.chat_input.is_empty());
        assert_eq!(fx.app.chat_cursor, 0);
        assert!(fx.app.waiting);

        let emitted = fx.probe.emitted();
        assert_eq!(
            emitted,
            vec![
                OutgoingEvent::Join {
                    pdf_id: "abc".to_string()
                },
                OutgoingEvent::ChatMessage {
                    pdf_id: "abc".to_string(),
                    message: "what is this about?".to_string()
                },
            ]
        );

        // Sends are gated while a response is pending.
        fx.app.chat_input = "another".to_string();
        fx.app.send_message();
        assert_eq!(fx.probe.emitted().len(), 2);
    }

    #[tokio::test]
    async fn matching_response_appends_and_clears_waiting() {
        let mut fx = fixture();
        connect_chat(&mut fx, "abc");
        fx.app.chat_input = "hi".to_string();
        fx.app.send_message();
        let generation = fx.app.channel_generation;

        // A response for some other document is dropped.
        fx.app.apply(ClientEvent::Channel {
            generation,
            event: ChannelEvent::ChatResponse {
                pdf_id: "other".to_string(),
                response: "wrong room".to_string(),
                timestamp: "t".to_string(),
            },
        });
        assert!(fx.app.waiting);
        assert_eq!(fx.app.messages.len(), 1);

        fx.app.apply(ClientEvent::Channel {
            generation,
            event: ChannelEvent::ChatResponse {
                pdf_id: "abc".to_string(),
                response: "It is a PDF.".to_string(),
                timestamp: "2023-01-01T12:00:01Z".to_string(),
            },
        });
        assert!(!fx.app.waiting);
        assert_eq!(fx.app.messages.len(), 2);
        assert_eq!(fx.app.messages[1].kind, MessageKind::Bot);
        assert_eq!(fx.app.messages[1].content, "It is a PDF.");
    }

    #[tokio::test]
    async fn server_error_sets_message_and_clears_waiting() {
        let mut fx = fixture();
        connect_chat(&mut fx, "abc");
        fx.app.chat_input = "hi".to_string();
        fx.app.send_message();
        let generation = fx.app.channel_generation;

        fx.app.apply(ClientEvent::Channel {
            generation,
            event: ChannelEvent::ServerError {
                message: "Invalid message data".to_string(),
            },
        });
        assert!(!fx.app.waiting);
        assert_eq!(fx.app.chat_error.as_deref(), Some("Invalid message data"));
    }

    #[tokio::test]
    async fn reconnect_joins_again_and_clears_connection_error() {
        let mut fx = fixture();
        connect_chat(&mut fx, "abc");
        let generation = fx.app.channel_generation;

        fx.app.apply(ClientEvent::Channel {
            generation,
            event: ChannelEvent::Disconnected,
        });
        assert_eq!(fx.app.connection, ConnectionStatus::Disconnected);
        assert!(fx.app.connection_error.is_some());

        fx.app.apply(ClientEvent::Channel {
            generation,
            event: ChannelEvent::ReconnectAttempt(1),
        });
        assert_eq!(fx.app.connection, ConnectionStatus::Reconnecting(1));

        fx.app.apply(ClientEvent::Channel {
            generation,
            event: ChannelEvent::Reconnected,
        });
        fx.app.apply(ClientEvent::Channel {
            generation,
            event: ChannelEvent::Connected,
        });

        assert_eq!(fx.app.connection, ConnectionStatus::Connected);
        assert!(fx.app.connection_error.is_none());
        let joins = fx
            .probe
            .emitted()
            .iter()
            .filter(|e| matches!(e, OutgoingEvent::Join { .. }))
            .count();
        assert_eq!(joins, 2);
    }

    #[tokio::test]
    async fn exhausted_reconnects_post_terminal_message() {
        let mut fx = fixture();
        connect_chat(&mut fx, "abc");
        let generation = fx.app.channel_generation;

        fx.app.apply(ClientEvent::Channel {
            generation,
            event: ChannelEvent::ReconnectFailed,
        });
        assert_eq!(fx.app.connection, ConnectionStatus::Failed);
        assert!(fx
            .app
            .connection_error
            .as_deref()
            .unwrap()
            .contains("please restart"));
    }

    #[tokio::test]
    async fn teardown_disconnects_once_and_fences_late_events() {
        let mut fx = fixture();
        connect_chat(&mut fx, "abc");
        let stale = fx.app.channel_generation;

        fx.app.teardown_channel();
        assert_eq!(fx.probe.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(fx.app.connection, ConnectionStatus::Disconnected);

        // A callback from the closed channel cannot mutate state.
        fx.app.apply(ClientEvent::Channel {
            generation: stale,
            event: ChannelEvent::ChatResponse {
                pdf_id: "abc".to_string(),
                response: "late".to_string(),
                timestamp: "t".to_string(),
            },
        });
        assert!(fx.app.messages.is_empty());
    }

    #[tokio::test]
    async fn attaching_a_new_document_remounts_the_chat_panel() {
        let mut fx = fixture();
        connect_chat(&mut fx, "abc");
        let generation = fx.app.channel_generation;
        fx.app.apply(ClientEvent::Channel {
            generation,
            event: ChannelEvent::ChatResponse {
                pdf_id: "abc".to_string(),
                response: "old".to_string(),
                timestamp: "t".to_string(),
            },
        });
        assert_eq!(fx.app.messages.len(), 1);

        fx.app.attach_document("def".to_string());
        assert!(fx.app.messages.is_empty());
        assert_eq!(fx.probe.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(fx.probe.connects.load(Ordering::SeqCst), 2);

        // Re-attaching the same identifier is not a remount.
        let connects_before = fx.probe.connects.load(Ordering::SeqCst);
        fx.app.attach_document("def".to_string());
        assert_eq!(fx.probe.connects.load(Ordering::SeqCst), connects_before);
    }

    #[tokio::test]
    async fn history_failure_offers_retry() {
        let mut fx = fixture();
        fx.app.pdf_id = Some("abc".to_string());

        fx.app.apply(ClientEvent::History {
            pdf_id: "abc".to_string(),
            result: Err("Failed to load chat history".to_string()),
        });
        assert_eq!(
            fx.app.history_error.as_deref(),
            Some("Failed to load chat history")
        );

        fx.app.fetch_history();
        assert!(fx.app.history_loading);
        assert!(fx.app.history_error.is_none());
    }

    #[tokio::test]
    async fn stale_history_results_are_dropped() {
        let mut fx = fixture();
        fx.app.pdf_id = Some("def".to_string());

        fx.app.apply(ClientEvent::History {
            pdf_id: "abc".to_string(),
            result: Ok(vec![HistoryMessage {
                content: "old doc".to_string(),
                kind: "bot".to_string(),
                timestamp: "t".to_string(),
            }]),
        });
        assert!(fx.app.messages.is_empty());
    }

    #[tokio::test]
    async fn history_prepends_before_optimistic_sends() {
        let mut fx = fixture();
        connect_chat(&mut fx, "abc");
        fx.app.chat_input = "early question".to_string();
        fx.app.send_message();

        fx.app.apply(ClientEvent::History {
            pdf_id: "abc".to_string(),
            result: Ok(vec![HistoryMessage {
                content: "from history".to_string(),
                kind: "bot".to_string(),
                timestamp: "t".to_string(),
            }]),
        });

        assert_eq!(fx.app.messages.len(), 2);
        assert_eq!(fx.app.messages[0].content, "from history");
        assert_eq!(fx.app.messages[1].content, "early question");
    }
}
