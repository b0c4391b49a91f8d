pub mod channel;
pub mod config;
pub mod content;
pub mod document;
pub mod error;
pub mod generate;
pub mod geometry;
pub mod host;
pub mod html;
pub mod instrumentation;
pub mod layout;
pub mod overlay;
pub mod page;
pub mod protocol;
pub mod renderer;
pub mod sandbox;
pub mod store;

use crate::instrumentation::ESCAPE_KEY;
use slint::{ComponentHandle, Timer, TimerMode};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, info, warn};

pub use crate::channel::{BridgeChannel, Inbound, SourceId};
pub use crate::config::PreviewConfig;
pub use crate::error::{BridgeError, GenerateError};
pub use crate::generate::GenerationClient;
pub use crate::geometry::{HostSpace, Rect, SandboxSpace};
pub use crate::host::{ActionOutcome, PreviewHost, SurfaceMetrics};
pub use crate::layout::PaintItem;
pub use crate::overlay::{Outline, OverlayFrame, Toolbar, ToolbarAction};
pub use crate::page::Viewport;
pub use crate::protocol::{HostCommand, SandboxMessage};
pub use crate::sandbox::SandboxProcess;
#[doc(hidden)]
pub use tracing;

pub trait OverlayBindings: 'static {
    type Ui: ComponentHandle + 'static;

    fn new_ui() -> Result<Self::Ui, slint::PlatformError>;

    fn bind_generate<F>(ui: &Self::Ui, handler: F)
    where
        F: Fn(String) + 'static;

    fn bind_reset<F>(ui: &Self::Ui, handler: F)
    where
        F: Fn() + 'static;

    fn bind_toolbar_action<F>(ui: &Self::Ui, handler: F)
    where
        F: Fn(String) + 'static;

    fn bind_layout_changed<F>(ui: &Self::Ui, handler: F)
    where
        F: Fn() + 'static;

    /// Pointer position over the surface, surface-local.
    fn bind_surface_pointer<F>(ui: &Self::Ui, handler: F)
    where
        F: Fn(f32, f32) + 'static;

    fn bind_surface_exit<F>(ui: &Self::Ui, handler: F)
    where
        F: Fn() + 'static;

    fn bind_surface_click<F>(ui: &Self::Ui, handler: F)
    where
        F: Fn(f32, f32) + 'static;

    /// Vertical wheel delta; positive scrolls towards the top.
    fn bind_surface_scroll<F>(ui: &Self::Ui, handler: F)
    where
        F: Fn(f32) + 'static;

    /// Text of a key pressed while the surface has focus.
    fn bind_surface_key<F>(ui: &Self::Ui, handler: F)
    where
        F: Fn(String) + 'static;

    fn surface_rect(ui: &Self::Ui) -> Option<Rect<HostSpace>>;
    fn container_rect(ui: &Self::Ui) -> Option<Rect<HostSpace>>;

    fn set_paint(ui: &Self::Ui, items: &[PaintItem]);

    fn set_generating(ui: &Self::Ui, generating: bool);
    fn set_status(ui: &Self::Ui, status: &str);
    fn set_hover_outline(ui: &Self::Ui, outline: OutlineGeometry);
    fn set_selection_outline(ui: &Self::Ui, outline: OutlineGeometry);
    fn set_toolbar(ui: &Self::Ui, toolbar: Option<&Toolbar>);
}

/// Outline placement in logical pixels, ready for a UI struct.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OutlineGeometry {
    pub visible: bool,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub border: f32,
}

impl From<Option<&Outline>> for OutlineGeometry {
    fn from(outline: Option<&Outline>) -> Self {
        match outline {
            Some(outline) => Self {
                visible: true,
                x: outline.rect.x as f32,
                y: outline.rect.y as f32,
                width: outline.rect.width as f32,
                height: outline.rect.height as f32,
                border: outline.kind.border_width() as f32,
            },
            None => Self::default(),
        }
    }
}

/// DOM key name for the text a UI key event carries.
pub fn key_name(text: &str) -> &str {
    match text {
        "\u{1b}" => ESCAPE_KEY,
        other => other,
    }
}

/// Host rect from UI measurements. An element that has not been laid out
/// yet reports a zero size and counts as unmeasured.
pub fn measured_rect(x: f32, y: f32, width: f32, height: f32) -> Option<Rect<HostSpace>> {
    if width <= 0.0 && height <= 0.0 {
        return None;
    }
    Some(Rect::new(x.into(), y.into(), width.into(), height.into()))
}

struct UiMetrics<'a, B: OverlayBindings> {
    ui: &'a B::Ui,
}

impl<B: OverlayBindings> SurfaceMetrics for UiMetrics<'_, B> {
    fn surface_rect(&self) -> Option<Rect<HostSpace>> {
        B::surface_rect(self.ui)
    }

    fn container_rect(&self) -> Option<Rect<HostSpace>> {
        B::container_rect(self.ui)
    }
}

type SharedHost = Arc<Mutex<PreviewHost>>;

/// Installs a `tracing` subscriber whose level comes from `PREVIEW_LOG`
/// (`info` when unset or unparsable).
pub fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let level = std::env::var("PREVIEW_LOG")
        .ok()
        .and_then(|raw| raw.trim().parse::<tracing::Level>().ok())
        .unwrap_or(tracing::Level::INFO);

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

pub fn run<B: OverlayBindings>() -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(PreviewConfig::from_env());
    let client = GenerationClient::new(config.generate_url.clone(), config.generate_timeout)?;
    info!(
        endpoint = client.endpoint(),
        sandbox = ?config.sandbox_command,
        "starting preview host"
    );

    let ui = B::new_ui()?;
    let host: SharedHost = Arc::new(Mutex::new(PreviewHost::new()));

    install_callbacks::<B>(&ui, &host, &config, client);

    let refresh_timer = Timer::default();
    {
        let ui_weak = ui.as_weak();
        let host = host.clone();
        refresh_timer.start(TimerMode::Repeated, config.surface_refresh, move || {
            if let Some(ui) = ui_weak.upgrade() {
                refresh_surface::<B>(&ui, &host);
            }
        });
    }

    load_content::<B>(&ui, &host, &config, String::new());

    ui.run()?;

    drop(refresh_timer);
    drop(ui);

    // The sandbox reader thread holds a clone of `host`, so the process has
    // to be released explicitly.
    match host.lock() {
        Ok(mut host) => host.release(),
        Err(err) => warn!("preview host lock poisoned during shutdown: {err}"),
    }

    Ok(())
}

fn install_callbacks<B: OverlayBindings>(
    ui: &B::Ui,
    host: &SharedHost,
    config: &Arc<PreviewConfig>,
    client: GenerationClient,
) {
    let generate_weak = ui.as_weak();
    let generate_host = host.clone();
    let generate_config = config.clone();
    B::bind_generate(ui, move |prompt| {
        let prompt = prompt.trim().to_string();
        if prompt.is_empty() {
            return;
        }
        let Some(ui) = generate_weak.upgrade() else {
            return;
        };

        {
            let Ok(mut host) = generate_host.lock() else {
                warn!("preview host lock poisoned; ignoring generate");
                return;
            };
            if host.store().is_generating() {
                debug!("generation already in flight");
                return;
            }
            host.set_generating(true);
        }
        B::set_generating(&ui, true);
        B::set_status(&ui, "Generating...");

        let client = client.clone();
        let ui_weak = generate_weak.clone();
        let host = generate_host.clone();
        let config = generate_config.clone();
        thread::spawn(move || {
            let content = client.generate_or_fallback(&prompt);

            let delivered = ui_weak.upgrade_in_event_loop(move |ui| {
                if let Ok(mut host) = host.lock() {
                    host.set_generating(false);
                }
                B::set_generating(&ui, false);
                load_content::<B>(&ui, &host, &config, content);
            });

            if let Err(err) = delivered {
                warn!("failed to deliver generated content: {err}");
            }
        });
    });

    let reset_weak = ui.as_weak();
    let reset_host = host.clone();
    let reset_config = config.clone();
    B::bind_reset(ui, move || {
        if let Some(ui) = reset_weak.upgrade() {
            load_content::<B>(&ui, &reset_host, &reset_config, String::new());
        }
    });

    let toolbar_weak = ui.as_weak();
    let toolbar_host = host.clone();
    B::bind_toolbar_action(ui, move |name| {
        let Some(action) = ToolbarAction::from_name(&name) else {
            warn!(action = %name, "unknown toolbar action");
            return;
        };
        let Some(ui) = toolbar_weak.upgrade() else {
            return;
        };
        let Ok(mut host) = toolbar_host.lock() else {
            warn!("preview host lock poisoned; ignoring toolbar action");
            return;
        };

        match host.toolbar_action(action) {
            ActionOutcome::Cleared => redraw::<B>(&ui, &host),
            ActionOutcome::NothingSelected => debug!("clear requested without a selection"),
            ActionOutcome::Acknowledged(action) => {
                B::set_status(&ui, &format!("{} is not available yet", action.name()));
            }
        }
    });

    let layout_weak = ui.as_weak();
    let layout_host = host.clone();
    B::bind_layout_changed(ui, move || {
        if let Some(ui) = layout_weak.upgrade() {
            refresh_surface::<B>(&ui, &layout_host);
        }
    });

    install_surface_input::<B>(ui, host);
}

/// Forwards input over the sandbox surface. The overlay sits above the
/// surface, so toolbar clicks never arrive here.
fn install_surface_input<B: OverlayBindings>(ui: &B::Ui, host: &SharedHost) {
    let pointer_weak = ui.as_weak();
    let pointer_host = host.clone();
    B::bind_surface_pointer(ui, move |x, y| {
        if let Some(ui) = pointer_weak.upgrade() {
            with_host(&pointer_host, |host| {
                host.pointer_moved(x.into(), y.into(), &UiMetrics::<B> { ui: &ui });
            });
        }
    });

    let exit_host = host.clone();
    B::bind_surface_exit(ui, move || with_host(&exit_host, PreviewHost::pointer_exited));

    let click_weak = ui.as_weak();
    let click_host = host.clone();
    B::bind_surface_click(ui, move |x, y| {
        if let Some(ui) = click_weak.upgrade() {
            with_host(&click_host, |host| {
                host.surface_clicked(x.into(), y.into(), &UiMetrics::<B> { ui: &ui });
            });
        }
    });

    let scroll_weak = ui.as_weak();
    let scroll_host = host.clone();
    B::bind_surface_scroll(ui, move |delta_y| {
        let Some(ui) = scroll_weak.upgrade() else {
            return;
        };
        with_host(&scroll_host, |host| {
            if host.surface_scrolled(delta_y.into()) {
                B::set_paint(&ui, &host.paint_list());
            }
        });
    });

    let key_host = host.clone();
    B::bind_surface_key(ui, move |text| {
        with_host(&key_host, |host| host.key_pressed(key_name(&text)));
    });
}

fn with_host(host: &SharedHost, apply: impl FnOnce(&mut PreviewHost)) {
    match host.lock() {
        Ok(mut host) => apply(&mut host),
        Err(err) => warn!("preview host lock poisoned; dropping surface input: {err}"),
    }
}

/// Retires the current sandbox instance and starts a fresh one for
/// `content`. Must run on the UI thread.
fn load_content<B: OverlayBindings>(
    ui: &B::Ui,
    host: &SharedHost,
    config: &PreviewConfig,
    content: String,
) {
    let Ok(mut guard) = host.lock() else {
        warn!("preview host lock poisoned; content not loaded");
        return;
    };

    let source = guard.begin_load(&content);
    B::set_paint(ui, &guard.paint_list());
    redraw::<B>(ui, &guard);

    let ui_weak = ui.as_weak();
    let frame_host = host.clone();
    // Frames are marshalled onto the UI thread, so the instance is attached
    // before the first one is handled.
    let on_frame = move |inbound: Inbound| {
        let host = frame_host.clone();
        let delivered = ui_weak.upgrade_in_event_loop(move |ui| {
            let Ok(mut host) = host.lock() else {
                warn!("preview host lock poisoned; dropping sandbox frame");
                return;
            };
            if host.handle_inbound(&inbound, &UiMetrics::<B> { ui: &ui }) {
                redraw::<B>(&ui, &host);
            }
        });
        if let Err(err) = delivered {
            debug!("sandbox frame arrived after the event loop stopped: {err}");
        }
    };

    match SandboxProcess::spawn(
        &config.sandbox_command,
        guard.document().to_string(),
        source,
        config.command_queue_cap,
        on_frame,
    ) {
        Ok(process) => {
            guard.attach(process, config.command_queue_cap);
            let status = if content.is_empty() {
                "Ready".to_string()
            } else {
                format!("Loaded {} bytes of markup", content.len())
            };
            B::set_status(ui, &status);
        }
        Err(err) => {
            warn!(%source, "failed to start sandbox: {err}");
            B::set_status(ui, &format!("Sandbox unavailable: {err}"));
        }
    }
}

fn refresh_surface<B: OverlayBindings>(ui: &B::Ui, host: &SharedHost) {
    let Ok(mut host) = host.lock() else {
        warn!("preview host lock poisoned; skipping surface refresh");
        return;
    };
    if host.refresh_surface(&UiMetrics::<B> { ui }) {
        B::set_paint(ui, &host.paint_list());
        redraw::<B>(ui, &host);
    }
}

fn redraw<B: OverlayBindings>(ui: &B::Ui, host: &PreviewHost) {
    let frame = host.overlay(&UiMetrics::<B> { ui });
    B::set_hover_outline(ui, frame.hover.as_ref().into());
    B::set_selection_outline(ui, frame.selection.as_ref().into());
    B::set_toolbar(ui, frame.toolbar.as_ref());
}

#[macro_export]
macro_rules! app_main {
    ($window:ty, $outline_box:ident, $paint_box:ident) => {
        struct PreviewOverlayBindings;

        impl PreviewOverlayBindings {
            fn outline_box(outline: $crate::OutlineGeometry) -> $outline_box {
                $outline_box {
                    visible: outline.visible,
                    x: outline.x,
                    y: outline.y,
                    width: outline.width,
                    height: outline.height,
                    border: outline.border,
                }
            }

            fn paint_box(item: &$crate::PaintItem) -> $paint_box {
                $paint_box {
                    x: item.rect.x as f32,
                    y: item.rect.y as f32,
                    width: item.rect.width as f32,
                    height: item.rect.height as f32,
                    text: item.text.as_str().into(),
                    font_size: item.font_size as f32,
                    padding: item.padding as f32,
                }
            }
        }

        impl $crate::OverlayBindings for PreviewOverlayBindings {
            type Ui = $window;

            fn new_ui() -> Result<Self::Ui, slint::PlatformError> {
                <Self::Ui>::new()
            }

            fn bind_generate<F>(ui: &Self::Ui, handler: F)
            where
                F: Fn(String) + 'static,
            {
                ui.on_generate(move |prompt| handler(prompt.to_string()));
            }

            fn bind_reset<F>(ui: &Self::Ui, handler: F)
            where
                F: Fn() + 'static,
            {
                ui.on_reset(handler);
            }

            fn bind_toolbar_action<F>(ui: &Self::Ui, handler: F)
            where
                F: Fn(String) + 'static,
            {
                ui.on_toolbar_action(move |action| handler(action.to_string()));
            }

            fn bind_layout_changed<F>(ui: &Self::Ui, handler: F)
            where
                F: Fn() + 'static,
            {
                ui.on_layout_changed(handler);
            }

            fn bind_surface_pointer<F>(ui: &Self::Ui, handler: F)
            where
                F: Fn(f32, f32) + 'static,
            {
                ui.on_surface_pointer(handler);
            }

            fn bind_surface_exit<F>(ui: &Self::Ui, handler: F)
            where
                F: Fn() + 'static,
            {
                ui.on_surface_exit(handler);
            }

            fn bind_surface_click<F>(ui: &Self::Ui, handler: F)
            where
                F: Fn(f32, f32) + 'static,
            {
                ui.on_surface_click(handler);
            }

            fn bind_surface_scroll<F>(ui: &Self::Ui, handler: F)
            where
                F: Fn(f32) + 'static,
            {
                ui.on_surface_scroll(handler);
            }

            fn bind_surface_key<F>(ui: &Self::Ui, handler: F)
            where
                F: Fn(String) + 'static,
            {
                ui.on_surface_key(move |text| handler(text.to_string()));
            }

            fn surface_rect(ui: &Self::Ui) -> Option<$crate::Rect<$crate::HostSpace>> {
                $crate::measured_rect(
                    ui.get_surface_x(),
                    ui.get_surface_y(),
                    ui.get_surface_width(),
                    ui.get_surface_height(),
                )
            }

            fn container_rect(ui: &Self::Ui) -> Option<$crate::Rect<$crate::HostSpace>> {
                $crate::measured_rect(
                    ui.get_container_x(),
                    ui.get_container_y(),
                    ui.get_container_width(),
                    ui.get_container_height(),
                )
            }

            fn set_paint(ui: &Self::Ui, items: &[$crate::PaintItem]) {
                let boxes: Vec<$paint_box> = items.iter().map(Self::paint_box).collect();
                ui.set_paint_boxes(slint::ModelRc::new(slint::VecModel::from(boxes)));
            }

            fn set_generating(ui: &Self::Ui, generating: bool) {
                ui.set_generating(generating);
            }

            fn set_status(ui: &Self::Ui, status: &str) {
                ui.set_status(status.into());
            }

            fn set_hover_outline(ui: &Self::Ui, outline: $crate::OutlineGeometry) {
                ui.set_hover_outline(Self::outline_box(outline));
            }

            fn set_selection_outline(ui: &Self::Ui, outline: $crate::OutlineGeometry) {
                ui.set_selection_outline(Self::outline_box(outline));
            }

            fn set_toolbar(ui: &Self::Ui, toolbar: Option<&$crate::Toolbar>) {
                match toolbar {
                    Some(toolbar) => {
                        let actions: Vec<slint::SharedString> = toolbar
                            .actions
                            .iter()
                            .map(|action| action.name().into())
                            .collect();
                        ui.set_toolbar_x(toolbar.rect.x as f32);
                        ui.set_toolbar_y(toolbar.rect.y as f32);
                        ui.set_toolbar_tag(toolbar.tag.as_str().into());
                        ui.set_toolbar_actions(slint::ModelRc::new(slint::VecModel::from(actions)));
                        ui.set_toolbar_visible(true);
                    }
                    None => ui.set_toolbar_visible(false),
                }
            }
        }

        fn main() {
            if let Err(err) = $crate::init_logging() {
                eprintln!("failed to initialise logging: {err}");
            }
            if let Err(err) = $crate::run::<PreviewOverlayBindings>() {
                $crate::tracing::error!("ui_host fatal error: {err}");
                std::process::exit(1);
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::OutlineKind;
    use crate::protocol::NodeId;
    use pretty_assertions::assert_eq;

    #[test]
    fn unmeasured_elements_have_no_rect() {
        assert_eq!(measured_rect(12.0, 30.0, 0.0, 0.0), None);
        assert_eq!(
            measured_rect(12.0, 30.0, 640.0, 0.0),
            Some(Rect::new(12.0, 30.0, 640.0, 0.0))
        );
        assert_eq!(
            measured_rect(0.0, 48.0, 800.0, 600.0),
            Some(Rect::new(0.0, 48.0, 800.0, 600.0))
        );
    }

    #[test]
    fn escape_text_maps_to_the_dom_key_name() {
        assert_eq!(key_name("\u{1b}"), "Escape");
        assert_eq!(key_name("a"), "a");
    }

    #[test]
    fn outline_geometry_mirrors_outline_rect() {
        let outline = Outline {
            kind: OutlineKind::Selection,
            node_id: NodeId::new("n3"),
            rect: Rect::new(60.0, 80.0, 100.0, 40.0),
        };

        assert_eq!(
            OutlineGeometry::from(Some(&outline)),
            OutlineGeometry {
                visible: true,
                x: 60.0,
                y: 80.0,
                width: 100.0,
                height: 40.0,
                border: 2.0,
            }
        );
        assert_eq!(OutlineGeometry::from(None), OutlineGeometry::default());
    }
}
