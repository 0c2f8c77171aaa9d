//! Embedded text templates with `{{key}}` placeholders.

/// Installer script published as `install.sh`.
pub const INSTALL_SH: &str = include_str!("../templates/install.sh");

/// Landing page published as `index.html`.
pub const INDEX_HTML: &str = include_str!("../templates/index.html");

/// Desktop entry installed under `usr/share/applications`.
pub const DESKTOP_ENTRY: &str = include_str!("../templates/app.desktop");

/// Substitute every `{{key}}` in `template`.
///
/// Unknown placeholders are left untouched.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}
