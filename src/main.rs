use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use egui_wgpu::{Renderer, ScreenDescriptor};
use egui_winit::State as EguiWinitState;
use tracing_subscriber::EnvFilter;
use wgpu::{CompositeAlphaMode, PresentMode, SurfaceError, TextureUsages};
use winit::{
    dpi::PhysicalSize,
    event::{Event, WindowEvent},
    event_loop::EventLoop,
    window::{Window, WindowBuilder},
};

use kaiwa::config::Config;
use kaiwa::model::{excerpt, MessageId, SegmentFilter, TeamInfo, ALL_SEGMENT};
use kaiwa::poll::PollingLoop;
use kaiwa::refresh::{RefreshController, RefreshKind, RefreshOutcome, ScrollAction};
use kaiwa::reply::{ReplyContext, QUOTE_CHARS};
use kaiwa::session::Session;
use kaiwa::store::{MessageStore, RequestId, StoreEvent, StoreOp, StoreReply};
use kaiwa::thread_view::ThreadView;
use kaiwa::transport::RemoteStore;
use kaiwa::viewport::ViewportMetrics;

const REPLY_HIGHLIGHT: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, PartialEq, Eq)]
enum Screen {
    TeamSelect,
    KeyEntry,
    Chat,
}

/// Non-refresh requests in flight, keyed by correlation id.
enum PendingAction {
    LoadTeams,
    CheckTeamAuth { team: String },
    VerifyAccess { team: String, key: String },
    CreateTeam,
    Post,
    Delete,
    MarkRead,
    LoadSegments,
    SegmentEdit,
}

/// Intents collected while the UI closure holds the borrow; applied after.
enum UiAction {
    ReloadTeams,
    JoinTeam(String),
    CreateTeam { name: String, key: String },
    SubmitKey,
    BackToTeams,
    Leave,
    SetFilter(SegmentFilter),
    CreateSegment(String),
    BeginReply(MessageId),
    CancelReply,
    Post,
    Delete(MessageId),
    MarkRead(MessageId),
}

struct App {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    egui_state: EguiWinitState,
    egui_ctx: egui::Context,
    egui_renderer: Renderer,

    store: RemoteStore,
    session: Session,
    refresh: RefreshController,
    reply: ReplyContext,
    polling: PollingLoop,
    view: ThreadView,
    pending: HashMap<RequestId, PendingAction>,

    screen: Screen,
    teams: Vec<TeamInfo>,
    segments: Vec<String>,
    selected_team: Option<String>,
    pending_team: String,
    key_input: String,
    new_team_name: String,
    new_team_key: String,
    new_segment_name: String,
    user_name: String,
    composer: String,
    composer_focus_requested: bool,
    status: Option<String>,

    last_viewport: ViewportMetrics,
    scroll_to_end: bool,
    highlight: Option<(MessageId, Instant)>,
}

impl App {
    fn new(event_loop: &EventLoop<()>, store: RemoteStore, app_config: &Config) -> Self {
        let window = Arc::new(
            WindowBuilder::new()
                .with_title("Kaiwa")
                .with_inner_size(PhysicalSize::new(980, 720))
                .build(event_loop)
                .expect("window"),
        );

        let instance = wgpu::Instance::default();
        let surface = instance
            .create_surface(window.clone())
            .expect("create surface");
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .expect("adapter");
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("kaiwa-device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
            },
            None,
        ))
        .expect("device");

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|format| format.is_srgb())
            .unwrap_or(surface_caps.formats[0]);
        let config = wgpu::SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: PresentMode::Fifo,
            desired_maximum_frame_latency: 2,
            alpha_mode: surface_caps
                .alpha_modes
                .iter()
                .copied()
                .find(|mode| *mode == CompositeAlphaMode::Opaque)
                .unwrap_or(surface_caps.alpha_modes[0]),
            view_formats: vec![],
        };
        surface.configure(&device, &config);

        let egui_ctx = egui::Context::default();
        let egui_state = EguiWinitState::new(
            egui_ctx.clone(),
            egui::ViewportId::ROOT,
            window.as_ref(),
            None,
            None,
        );
        let egui_renderer = Renderer::new(&device, surface_format, None, 1);

        let mut app = Self {
            window,
            surface,
            device,
            queue,
            config,
            egui_state,
            egui_ctx,
            egui_renderer,
            store,
            session: Session::new(),
            refresh: RefreshController::new(),
            reply: ReplyContext::default(),
            polling: PollingLoop::new(app_config.poll_interval),
            view: ThreadView::default(),
            pending: HashMap::new(),
            screen: Screen::TeamSelect,
            teams: Vec::new(),
            segments: Vec::new(),
            selected_team: None,
            pending_team: String::new(),
            key_input: String::new(),
            new_team_name: String::new(),
            new_team_key: String::new(),
            new_segment_name: String::new(),
            user_name: String::new(),
            composer: String::new(),
            composer_focus_requested: false,
            status: None,
            last_viewport: ViewportMetrics::default(),
            scroll_to_end: false,
            highlight: None,
        };
        app.reload_teams();
        app
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        if size.width == 0 || size.height == 0 {
            return;
        }
        self.config.width = size.width;
        self.config.height = size.height;
        self.surface.configure(&self.device, &self.config);
    }

    fn reload_teams(&mut self) {
        let request = self.store.submit(StoreOp::GetTeams);
        self.pending.insert(request, PendingAction::LoadTeams);
    }

    fn reload_segments(&mut self) {
        let request = self.store.submit(StoreOp::GetSegments {
            team: self.session.team().to_string(),
            key: self.session.key().to_string(),
        });
        self.pending.insert(request, PendingAction::LoadSegments);
    }

    fn join_team(&mut self, team: String, key: String) {
        self.session.join(team, key);
        self.refresh.reset();
        self.reply = ReplyContext::default();
        self.view = ThreadView::default();
        self.segments.clear();
        self.status = None;
        self.screen = Screen::Chat;
        self.composer_focus_requested = true;
        self.polling.start(Instant::now());
        self.refresh
            .request_refresh(&mut self.store, &self.session, RefreshKind::Initial);
        self.reload_segments();
    }

    fn leave_team(&mut self) {
        self.polling.stop();
        self.refresh.reset();
        // Acks from the old session must not act on the new one.
        self.pending.clear();
        self.session.leave();
        self.reply = ReplyContext::default();
        self.view = ThreadView::default();
        self.segments.clear();
        self.screen = Screen::TeamSelect;
        self.reload_teams();
    }

    fn submit_post(&mut self) {
        let text = self.composer.trim().to_string();
        let author = self.user_name.trim().to_string();
        if author.is_empty() || text.is_empty() {
            self.status = Some("Enter your name and a message first.".to_string());
            return;
        }
        let request = self.store.submit(StoreOp::PostMessage {
            team: self.session.team().to_string(),
            key: self.session.key().to_string(),
            author,
            text,
            reply_to: self.reply.outgoing_target(),
            segment: self.session.compose_segment(&self.reply),
            attachment: None,
        });
        self.pending.insert(request, PendingAction::Post);
    }

    fn apply_ui_action(&mut self, action: UiAction) {
        match action {
            UiAction::ReloadTeams => self.reload_teams(),
            UiAction::JoinTeam(team) => {
                let request = self
                    .store
                    .submit(StoreOp::CheckTeamAuth { team: team.clone() });
                self.pending
                    .insert(request, PendingAction::CheckTeamAuth { team });
            }
            UiAction::CreateTeam { name, key } => {
                if name.trim().is_empty() {
                    self.status = Some("Team name cannot be empty.".to_string());
                    return;
                }
                let request = self.store.submit(StoreOp::CreateTeam {
                    team_name: name.trim().to_string(),
                    team_key: key,
                });
                self.pending.insert(request, PendingAction::CreateTeam);
            }
            UiAction::SubmitKey => {
                let team = self.pending_team.clone();
                let key = self.key_input.clone();
                if key.is_empty() {
                    self.status = Some("Enter the team key.".to_string());
                    return;
                }
                let request = self.store.submit(StoreOp::VerifyTeamAccess {
                    team: team.clone(),
                    key: key.clone(),
                });
                self.pending
                    .insert(request, PendingAction::VerifyAccess { team, key });
            }
            UiAction::BackToTeams => {
                self.pending_team.clear();
                self.key_input.clear();
                self.status = None;
                self.screen = Screen::TeamSelect;
            }
            UiAction::Leave => self.leave_team(),
            UiAction::SetFilter(filter) => {
                if !self.reply.is_pending() && self.session.active_filter != filter {
                    self.session.active_filter = filter;
                    self.refresh.request_refresh(
                        &mut self.store,
                        &self.session,
                        RefreshKind::Periodic,
                    );
                }
            }
            UiAction::CreateSegment(name) => {
                if name.trim().is_empty() {
                    return;
                }
                let request = self.store.submit(StoreOp::CreateSegment {
                    team: self.session.team().to_string(),
                    key: self.session.key().to_string(),
                    segment_name: name.trim().to_string(),
                });
                self.pending.insert(request, PendingAction::SegmentEdit);
                self.new_segment_name.clear();
            }
            UiAction::BeginReply(id) => {
                if let Some(target) = self.view.resolve(&id).cloned() {
                    self.reply.begin(&target);
                    self.highlight = Some((id, Instant::now() + REPLY_HIGHLIGHT));
                    self.composer_focus_requested = true;
                }
            }
            UiAction::CancelReply => {
                self.reply.cancel();
            }
            UiAction::Post => self.submit_post(),
            UiAction::Delete(id) => {
                let request = self.store.submit(StoreOp::DeleteMessage {
                    team: self.session.team().to_string(),
                    key: self.session.key().to_string(),
                    message_id: id,
                });
                self.pending.insert(request, PendingAction::Delete);
            }
            UiAction::MarkRead(id) => {
                let reader = self.user_name.trim().to_string();
                if reader.is_empty() {
                    self.status = Some("Enter your name first.".to_string());
                    return;
                }
                let request = self.store.submit(StoreOp::MarkAsRead {
                    team: self.session.team().to_string(),
                    key: self.session.key().to_string(),
                    message_id: id,
                    reader_name: reader,
                });
                self.pending.insert(request, PendingAction::MarkRead);
            }
        }
    }

    fn handle_store_event(&mut self, event: StoreEvent) {
        if self.refresh.owns(event.request) {
            let outcome = self.refresh.handle_response(
                event.request,
                event.result,
                &self.session,
                self.last_viewport,
            );
            match outcome {
                RefreshOutcome::Applied { view, scroll } => {
                    self.view = view;
                    if scroll == ScrollAction::ToEnd {
                        self.scroll_to_end = true;
                    }
                }
                RefreshOutcome::AuthRequired => {
                    self.status = Some("This team requires a valid key; signed out.".to_string());
                    self.leave_team();
                }
                RefreshOutcome::Failed(err) => {
                    self.status = Some(err.to_string());
                }
                RefreshOutcome::Stale => {}
            }
            return;
        }

        let Some(action) = self.pending.remove(&event.request) else {
            return;
        };
        match (action, event.result) {
            (PendingAction::LoadTeams, Ok(StoreReply::Teams { teams })) => {
                self.teams = teams;
            }
            (PendingAction::CheckTeamAuth { team }, Ok(StoreReply::TeamAuth { is_protected })) => {
                if is_protected {
                    self.pending_team = team;
                    self.key_input.clear();
                    self.status = None;
                    self.screen = Screen::KeyEntry;
                } else {
                    self.join_team(team, String::new());
                }
            }
            (PendingAction::VerifyAccess { team, key }, Ok(StoreReply::Access { authorized })) => {
                if authorized {
                    self.join_team(team, key);
                } else {
                    self.status = Some("That key is not correct.".to_string());
                }
            }
            (PendingAction::CreateTeam, Ok(_)) => {
                self.new_team_name.clear();
                self.new_team_key.clear();
                self.status = Some("Team created.".to_string());
                self.reload_teams();
            }
            (PendingAction::Post, Ok(_)) => {
                self.composer.clear();
                self.reply.complete();
                self.composer_focus_requested = true;
                self.refresh.request_refresh(
                    &mut self.store,
                    &self.session,
                    RefreshKind::AfterPost,
                );
            }
            (PendingAction::Delete, Ok(_)) | (PendingAction::MarkRead, Ok(_)) => {
                self.refresh
                    .request_refresh(&mut self.store, &self.session, RefreshKind::Periodic);
            }
            (PendingAction::LoadSegments, Ok(StoreReply::Segments { segments })) => {
                self.segments = segments;
            }
            (PendingAction::SegmentEdit, Ok(_)) => {
                self.reload_segments();
            }
            (_, Err(err)) => {
                self.status = Some(err.to_string());
            }
            (_, Ok(reply)) => {
                tracing::warn!(?reply, "reply had an unexpected shape");
                self.status = Some("The store sent an unexpected reply.".to_string());
            }
        }
    }

    fn pump(&mut self, now: Instant) {
        if self.screen == Screen::Chat && self.polling.tick(now) {
            self.refresh
                .request_refresh(&mut self.store, &self.session, RefreshKind::Periodic);
        }
        for event in self.store.poll() {
            self.handle_store_event(event);
        }
        if let Some((_, until)) = self.highlight {
            if now >= until {
                self.highlight = None;
            }
        }
    }

    fn render(&mut self) {
        self.pump(Instant::now());

        let raw_input = self.egui_state.take_egui_input(self.window.as_ref());
        let mut actions: Vec<UiAction> = Vec::new();
        let full_output = self.egui_ctx.run(raw_input, |ctx| match self.screen {
            Screen::TeamSelect => {
                egui::CentralPanel::default().show(ctx, |ui| {
                    ui.heading("Kaiwa");
                    ui.add_space(8.0);
                    ui.label("Pick a team");
                    for team in &self.teams {
                        let lock = if team.is_protected { " 🔒" } else { "" };
                        let selected = self.selected_team.as_deref() == Some(team.name.as_str());
                        if ui
                            .selectable_label(selected, format!("{}{}", team.name, lock))
                            .clicked()
                        {
                            self.selected_team = Some(team.name.clone());
                        }
                    }
                    ui.add_space(6.0);
                    ui.horizontal(|row| {
                        let join = row
                            .add_enabled(self.selected_team.is_some(), egui::Button::new("Join"));
                        if join.clicked() {
                            if let Some(team) = self.selected_team.clone() {
                                actions.push(UiAction::JoinTeam(team));
                            }
                        }
                        if row.button("Reload").clicked() {
                            actions.push(UiAction::ReloadTeams);
                        }
                    });
                    ui.separator();
                    ui.label("Create a team");
                    ui.add(
                        egui::TextEdit::singleline(&mut self.new_team_name).hint_text("team name"),
                    );
                    ui.add(
                        egui::TextEdit::singleline(&mut self.new_team_key)
                            .hint_text("key (blank = open)"),
                    );
                    if ui.button("Create").clicked() {
                        actions.push(UiAction::CreateTeam {
                            name: self.new_team_name.clone(),
                            key: self.new_team_key.clone(),
                        });
                    }
                    if let Some(status) = &self.status {
                        ui.add_space(8.0);
                        ui.colored_label(egui::Color32::from_rgb(230, 170, 90), status);
                    }
                });
            }
            Screen::KeyEntry => {
                egui::CentralPanel::default().show(ctx, |ui| {
                    ui.heading(format!("{} is protected", self.pending_team));
                    ui.add_space(8.0);
                    let field = ui.add(
                        egui::TextEdit::singleline(&mut self.key_input)
                            .password(true)
                            .hint_text("team key"),
                    );
                    let submit_enter =
                        field.lost_focus() && ui.input(|input| input.key_pressed(egui::Key::Enter));
                    ui.horizontal(|row| {
                        if row.button("Verify").clicked() || submit_enter {
                            actions.push(UiAction::SubmitKey);
                        }
                        if row.button("Back").clicked() {
                            actions.push(UiAction::BackToTeams);
                        }
                    });
                    if let Some(status) = &self.status {
                        ui.add_space(8.0);
                        ui.colored_label(egui::Color32::from_rgb(230, 170, 90), status);
                    }
                });
            }
            Screen::Chat => {
                egui::TopBottomPanel::top("chat_header").show(ctx, |ui| {
                    ui.horizontal(|row| {
                        row.heading(format!("Team: {}", self.session.team()));
                        row.separator();
                        let displayed = self.session.displayed_segment(&self.reply);
                        let locked = self.reply.is_pending();
                        row.add_enabled_ui(!locked, |row| {
                            egui::ComboBox::from_id_source("segment_filter")
                                .selected_text(displayed.clone())
                                .show_ui(row, |list| {
                                    if list
                                        .selectable_label(displayed == ALL_SEGMENT, ALL_SEGMENT)
                                        .clicked()
                                    {
                                        actions.push(UiAction::SetFilter(SegmentFilter::All));
                                    }
                                    for segment in &self.segments {
                                        if list
                                            .selectable_label(&displayed == segment, segment)
                                            .clicked()
                                        {
                                            actions.push(UiAction::SetFilter(SegmentFilter::Only(
                                                segment.clone(),
                                            )));
                                        }
                                    }
                                });
                        });
                        row.add(
                            egui::TextEdit::singleline(&mut self.new_segment_name)
                                .hint_text("new segment")
                                .desired_width(110.0),
                        );
                        if row.small_button("+").clicked() {
                            actions.push(UiAction::CreateSegment(self.new_segment_name.clone()));
                        }
                        row.with_layout(egui::Layout::right_to_left(egui::Align::Center), |end| {
                            if end.button("Leave").clicked() {
                                actions.push(UiAction::Leave);
                            }
                        });
                    });
                    if let Some(status) = &self.status {
                        ui.colored_label(egui::Color32::from_rgb(230, 170, 90), status);
                    }
                });

                egui::TopBottomPanel::bottom("composer").show(ctx, |ui| {
                    if let Some(target) = self.reply.pending() {
                        ui.horizontal(|row| {
                            row.label(
                                egui::RichText::new(format!(
                                    "↩ Replying to {}: {}",
                                    target.author, target.excerpt
                                ))
                                .small()
                                .color(egui::Color32::from_rgb(150, 180, 220)),
                            );
                            if row.small_button("Cancel").clicked() {
                                actions.push(UiAction::CancelReply);
                            }
                        });
                    }
                    ui.horizontal(|row| {
                        row.add(
                            egui::TextEdit::singleline(&mut self.user_name)
                                .hint_text("your name")
                                .desired_width(120.0),
                        );
                        let composer = row.add(
                            egui::TextEdit::singleline(&mut self.composer)
                                .hint_text("Send a message")
                                .desired_width(f32::INFINITY),
                        );
                        if self.composer_focus_requested {
                            composer.request_focus();
                            self.composer_focus_requested = false;
                        }
                        let send_clicked = row.button("Send").clicked();
                        let send_enter = composer.has_focus()
                            && row.input(|input| input.key_pressed(egui::Key::Enter));
                        if send_clicked || send_enter {
                            actions.push(UiAction::Post);
                            self.composer_focus_requested = true;
                        }
                    });
                    ui.add_space(4.0);
                });

                egui::CentralPanel::default().show(ctx, |ui| {
                    let output = egui::ScrollArea::vertical()
                        .auto_shrink([false, false])
                        .show(ui, |ui| {
                            if self.view.is_empty() {
                                ui.add_space(40.0);
                                ui.vertical_centered(|center| {
                                    center.label(egui::RichText::new("No messages yet.").weak());
                                });
                            }
                            for row in &self.view.rows {
                                let message = &row.message;
                                let highlighted = matches!(
                                    &self.highlight,
                                    Some((id, _)) if id == &message.id
                                );
                                let fill = if highlighted {
                                    egui::Color32::from_rgb(72, 66, 38)
                                } else {
                                    egui::Color32::TRANSPARENT
                                };
                                egui::Frame::none()
                                    .fill(fill)
                                    .inner_margin(4.0)
                                    .show(ui, |cell| {
                                        cell.horizontal(|line| {
                                            if row.is_reply {
                                                line.add_space(28.0);
                                            }
                                            line.vertical(|body| {
                                                body.horizontal(|head| {
                                                    head.label(
                                                        egui::RichText::new(&message.author)
                                                            .strong()
                                                            .color(egui::Color32::from_rgb(
                                                                200, 210, 230,
                                                            )),
                                                    );
                                                    head.label(
                                                        egui::RichText::new(
                                                            message
                                                                .timestamp
                                                                .format("%m-%d %H:%M")
                                                                .to_string(),
                                                        )
                                                        .color(egui::Color32::from_rgb(
                                                            140, 150, 170,
                                                        )),
                                                    );
                                                    head.label(
                                                        egui::RichText::new(&message.segment)
                                                            .small()
                                                            .weak(),
                                                    );
                                                });
                                                if let Some(target) = message
                                                    .reply_to
                                                    .as_ref()
                                                    .and_then(|id| self.view.resolve(id))
                                                {
                                                    body.label(
                                                        egui::RichText::new(format!(
                                                            "↩ {}: {}",
                                                            target.author,
                                                            excerpt(&target.text, QUOTE_CHARS)
                                                        ))
                                                        .small()
                                                        .color(egui::Color32::from_rgb(
                                                            150, 160, 180,
                                                        )),
                                                    );
                                                }
                                                body.label(&message.text);
                                                if let Some(attachment) = &message.attachment {
                                                    body.label(
                                                        egui::RichText::new(format!(
                                                            "📎 {} ({})",
                                                            attachment.name, attachment.kind
                                                        ))
                                                        .small(),
                                                    );
                                                }
                                                body.horizontal(|buttons| {
                                                    if !row.is_reply
                                                        && buttons.small_button("Reply").clicked()
                                                    {
                                                        actions.push(UiAction::BeginReply(
                                                            message.id.clone(),
                                                        ));
                                                    }
                                                    if buttons.small_button("Read").clicked() {
                                                        actions.push(UiAction::MarkRead(
                                                            message.id.clone(),
                                                        ));
                                                    }
                                                    if buttons.small_button("Delete").clicked() {
                                                        actions.push(UiAction::Delete(
                                                            message.id.clone(),
                                                        ));
                                                    }
                                                });
                                                if !message.readers.is_empty() {
                                                    body.label(
                                                        egui::RichText::new(format!(
                                                            "Read by {}",
                                                            message.readers.join(", ")
                                                        ))
                                                        .small()
                                                        .weak(),
                                                    );
                                                }
                                            });
                                        });
                                    });
                                ui.add_space(2.0);
                            }
                            if self.scroll_to_end {
                                ui.scroll_to_cursor(Some(egui::Align::BOTTOM));
                            }
                        });
                    self.last_viewport = ViewportMetrics {
                        content_height: output.content_size.y,
                        viewport_height: output.inner_rect.height(),
                        scroll_offset: output.state.offset.y,
                        row_count: self.view.len(),
                    };
                });
            }
        });
        self.scroll_to_end = false;

        for action in actions {
            self.apply_ui_action(action);
        }

        self.egui_state
            .handle_platform_output(self.window.as_ref(), full_output.platform_output);

        for (id, delta) in &full_output.textures_delta.set {
            self.egui_renderer
                .update_texture(&self.device, &self.queue, *id, delta);
        }

        let screen_descriptor = ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: full_output.pixels_per_point,
        };

        let clipped_primitives = self
            .egui_ctx
            .tessellate(full_output.shapes, full_output.pixels_per_point);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("kaiwa-encoder"),
            });
        self.egui_renderer.update_buffers(
            &self.device,
            &self.queue,
            &mut encoder,
            &clipped_primitives,
            &screen_descriptor,
        );

        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(SurfaceError::Lost) => {
                self.resize(PhysicalSize::new(self.config.width, self.config.height));
                return;
            }
            Err(SurfaceError::OutOfMemory) => {
                return;
            }
            Err(err) => {
                tracing::error!(%err, "surface error");
                return;
            }
        };
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("kaiwa-render-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: 0.06,
                            g: 0.07,
                            b: 0.09,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            self.egui_renderer
                .render(&mut render_pass, &clipped_primitives, &screen_descriptor);
        }

        self.queue.submit(Some(encoder.finish()));
        frame.present();

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("kaiwa: {err}");
            std::process::exit(1);
        }
    };
    let store = match RemoteStore::connect(&config.server) {
        Ok(store) => store,
        Err(err) => {
            eprintln!("kaiwa: {err} (is the store server running?)");
            std::process::exit(1);
        }
    };

    let event_loop = EventLoop::new().expect("event loop");
    let mut app = App::new(&event_loop, store, &config);

    let _ = event_loop.run(move |event, elwt| match event {
        Event::WindowEvent { event, window_id } if window_id == app.window.id() => match event {
            WindowEvent::RedrawRequested => app.render(),
            WindowEvent::CloseRequested => elwt.exit(),
            WindowEvent::Resized(size) => app.resize(size),
            WindowEvent::ScaleFactorChanged {
                mut inner_size_writer,
                ..
            } => {
                let size = app.window.inner_size();
                let _ = inner_size_writer.request_inner_size(size);
                app.resize(size);
            }
            _ => {
                let _ = app
                    .egui_state
                    .on_window_event(app.window.as_ref(), &event)
                    .consumed;
            }
        },
        Event::AboutToWait => {
            app.window.request_redraw();
        }
        _ => {}
    });
}
