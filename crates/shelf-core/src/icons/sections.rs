pub const GENERIC_PACKAGE_ICON: &str = "package-x-generic";

const SECTION_ICONS: &[(&str, &str)] = &[
    ("admin", "system-run"),
    ("devel", "applications-development"),
    ("doc", "text-x-generic"),
    ("editors", "text-editor"),
    ("electronics", "applications-engineering"),
    ("games", "applications-games"),
    ("gnome", "gnome-logo-icon"),
    ("graphics", "applications-graphics"),
    ("interpreters", "utilities-terminal"),
    ("kde", "kde"),
    ("mail", "mail-send"),
    ("math", "accessories-calculator"),
    ("net", "network-workgroup"),
    ("news", "news-feed"),
    ("science", "applications-science"),
    ("sound", "applications-multimedia"),
    ("text", "text-x-generic"),
    ("utils", "applications-utilities"),
    ("video", "video-x-generic"),
    ("web", "web-browser"),
    ("x11", "video-display"),
];

/// Strips the archive area from a Debian section: `contrib/games` -> `games`.
pub fn main_section(section: &str) -> &str {
    section.trim().rsplit('/').next().unwrap_or_default()
}

/// Generic themed icon for a section, `package-x-generic` when unknown.
pub fn section_icon(section: &str) -> &'static str {
    let section = main_section(section);
    SECTION_ICONS
        .iter()
        .find(|(name, _)| *name == section)
        .map_or(GENERIC_PACKAGE_ICON, |(_, icon)| icon)
}
