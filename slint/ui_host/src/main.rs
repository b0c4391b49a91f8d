slint::include_modules!();

preview_ui_host_runtime::app_main!(AppWindow, OutlineBox, PaintBox);
