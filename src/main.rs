mod app;

use tagtree::config::Settings;
use tagtree::{launch, logging};

fn main() -> eframe::Result<()> {
    logging::init();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    let (request, initial_status) = match launch::parse_launch_request_from_args(&cli_args) {
        Ok(request) => (request, None),
        Err(err) => {
            log::warn!("ignoring launch arguments: {err}");
            (
                launch::LaunchRequest::default(),
                Some(format!("Launch args error: {err}")),
            )
        }
    };
    let settings = Settings::resolve(request.settings.as_deref());

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1180.0, 760.0])
            .with_min_inner_size([640.0, 360.0])
            .with_decorations(false)
            .with_resizable(true),
        ..Default::default()
    };

    eframe::run_native(
        "TagTree",
        native_options,
        Box::new(move |_cc| {
            Ok(Box::new(app::TagTreeApp::new(
                settings,
                request.open,
                initial_status,
            )))
        }),
    )
}
