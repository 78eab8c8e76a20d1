//! evdev key names
//!
//! Maps the `KEY_*` / `BTN_*` names used in configuration files to their
//! Linux input codes and back.

use evdev::Key;

/// Last code of the classic keyboard block
pub const KEY_UNKNOWN: u16 = 240;
/// First mouse/joystick button code
pub const BTN_MISC: u16 = 0x100;
/// First code of the extended keyboard block
pub const KEY_OK: u16 = 0x160;
pub const KEY_MAX: u16 = 0x2ff;

static KEY_NAMES: &[(&str, Key)] = &[
    // Modifiers
    ("KEY_LEFTCTRL", Key::KEY_LEFTCTRL),
    ("KEY_RIGHTCTRL", Key::KEY_RIGHTCTRL),
    ("KEY_LEFTSHIFT", Key::KEY_LEFTSHIFT),
    ("KEY_RIGHTSHIFT", Key::KEY_RIGHTSHIFT),
    ("KEY_LEFTALT", Key::KEY_LEFTALT),
    ("KEY_RIGHTALT", Key::KEY_RIGHTALT),
    ("KEY_LEFTMETA", Key::KEY_LEFTMETA),
    ("KEY_RIGHTMETA", Key::KEY_RIGHTMETA),
    // Letters
    ("KEY_A", Key::KEY_A),
    ("KEY_B", Key::KEY_B),
    ("KEY_C", Key::KEY_C),
    ("KEY_D", Key::KEY_D),
    ("KEY_E", Key::KEY_E),
    ("KEY_F", Key::KEY_F),
    ("KEY_G", Key::KEY_G),
    ("KEY_H", Key::KEY_H),
    ("KEY_I", Key::KEY_I),
    ("KEY_J", Key::KEY_J),
    ("KEY_K", Key::KEY_K),
    ("KEY_L", Key::KEY_L),
    ("KEY_M", Key::KEY_M),
    ("KEY_N", Key::KEY_N),
    ("KEY_O", Key::KEY_O),
    ("KEY_P", Key::KEY_P),
    ("KEY_Q", Key::KEY_Q),
    ("KEY_R", Key::KEY_R),
    ("KEY_S", Key::KEY_S),
    ("KEY_T", Key::KEY_T),
    ("KEY_U", Key::KEY_U),
    ("KEY_V", Key::KEY_V),
    ("KEY_W", Key::KEY_W),
    ("KEY_X", Key::KEY_X),
    ("KEY_Y", Key::KEY_Y),
    ("KEY_Z", Key::KEY_Z),
    // Digits
    ("KEY_1", Key::KEY_1),
    ("KEY_2", Key::KEY_2),
    ("KEY_3", Key::KEY_3),
    ("KEY_4", Key::KEY_4),
    ("KEY_5", Key::KEY_5),
    ("KEY_6", Key::KEY_6),
    ("KEY_7", Key::KEY_7),
    ("KEY_8", Key::KEY_8),
    ("KEY_9", Key::KEY_9),
    ("KEY_0", Key::KEY_0),
    // Function keys
    ("KEY_F1", Key::KEY_F1),
    ("KEY_F2", Key::KEY_F2),
    ("KEY_F3", Key::KEY_F3),
    ("KEY_F4", Key::KEY_F4),
    ("KEY_F5", Key::KEY_F5),
    ("KEY_F6", Key::KEY_F6),
    ("KEY_F7", Key::KEY_F7),
    ("KEY_F8", Key::KEY_F8),
    ("KEY_F9", Key::KEY_F9),
    ("KEY_F10", Key::KEY_F10),
    ("KEY_F11", Key::KEY_F11),
    ("KEY_F12", Key::KEY_F12),
    ("KEY_F13", Key::KEY_F13),
    ("KEY_F14", Key::KEY_F14),
    ("KEY_F15", Key::KEY_F15),
    ("KEY_F16", Key::KEY_F16),
    ("KEY_F17", Key::KEY_F17),
    ("KEY_F18", Key::KEY_F18),
    ("KEY_F19", Key::KEY_F19),
    ("KEY_F20", Key::KEY_F20),
    ("KEY_F21", Key::KEY_F21),
    ("KEY_F22", Key::KEY_F22),
    ("KEY_F23", Key::KEY_F23),
    ("KEY_F24", Key::KEY_F24),
    // Editing and whitespace
    ("KEY_ESC", Key::KEY_ESC),
    ("KEY_TAB", Key::KEY_TAB),
    ("KEY_ENTER", Key::KEY_ENTER),
    ("KEY_SPACE", Key::KEY_SPACE),
    ("KEY_BACKSPACE", Key::KEY_BACKSPACE),
    ("KEY_DELETE", Key::KEY_DELETE),
    ("KEY_INSERT", Key::KEY_INSERT),
    ("KEY_CAPSLOCK", Key::KEY_CAPSLOCK),
    ("KEY_MINUS", Key::KEY_MINUS),
    ("KEY_EQUAL", Key::KEY_EQUAL),
    ("KEY_LEFTBRACE", Key::KEY_LEFTBRACE),
    ("KEY_RIGHTBRACE", Key::KEY_RIGHTBRACE),
    ("KEY_SEMICOLON", Key::KEY_SEMICOLON),
    ("KEY_APOSTROPHE", Key::KEY_APOSTROPHE),
    ("KEY_GRAVE", Key::KEY_GRAVE),
    ("KEY_BACKSLASH", Key::KEY_BACKSLASH),
    ("KEY_COMMA", Key::KEY_COMMA),
    ("KEY_DOT", Key::KEY_DOT),
    ("KEY_SLASH", Key::KEY_SLASH),
    // Navigation
    ("KEY_UP", Key::KEY_UP),
    ("KEY_DOWN", Key::KEY_DOWN),
    ("KEY_LEFT", Key::KEY_LEFT),
    ("KEY_RIGHT", Key::KEY_RIGHT),
    ("KEY_HOME", Key::KEY_HOME),
    ("KEY_END", Key::KEY_END),
    ("KEY_PAGEUP", Key::KEY_PAGEUP),
    ("KEY_PAGEDOWN", Key::KEY_PAGEDOWN),
    // Media and desktop
    ("KEY_MUTE", Key::KEY_MUTE),
    ("KEY_VOLUMEDOWN", Key::KEY_VOLUMEDOWN),
    ("KEY_VOLUMEUP", Key::KEY_VOLUMEUP),
    ("KEY_PLAYPAUSE", Key::KEY_PLAYPAUSE),
    ("KEY_NEXTSONG", Key::KEY_NEXTSONG),
    ("KEY_PREVIOUSSONG", Key::KEY_PREVIOUSSONG),
    ("KEY_STOPCD", Key::KEY_STOPCD),
    ("KEY_BACK", Key::KEY_BACK),
    ("KEY_FORWARD", Key::KEY_FORWARD),
    ("KEY_REFRESH", Key::KEY_REFRESH),
    ("KEY_ZOOMIN", Key::KEY_ZOOMIN),
    ("KEY_ZOOMOUT", Key::KEY_ZOOMOUT),
    ("KEY_PRINT", Key::KEY_PRINT),
    ("KEY_UNKNOWN", Key::KEY_UNKNOWN),
    // Mouse buttons
    ("BTN_LEFT", Key::BTN_LEFT),
    ("BTN_RIGHT", Key::BTN_RIGHT),
    ("BTN_MIDDLE", Key::BTN_MIDDLE),
    ("BTN_SIDE", Key::BTN_SIDE),
    ("BTN_EXTRA", Key::BTN_EXTRA),
    ("BTN_FORWARD", Key::BTN_FORWARD),
    ("BTN_BACK", Key::BTN_BACK),
    ("BTN_TASK", Key::BTN_TASK),
];

/// Resolve a `KEY_*`/`BTN_*` name (case-insensitive) to its code
pub fn key_code(name: &str) -> Option<u16> {
    KEY_NAMES
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, key)| key.code())
}

/// Key code to human-readable name, for logs
pub fn key_name(code: u16) -> String {
    KEY_NAMES
        .iter()
        .find(|(_, key)| key.code() == code)
        .map(|(n, _)| n.to_string())
        .unwrap_or_else(|| format!("KEY_{}", code))
}
