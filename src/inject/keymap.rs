//! US-layout character to key-code mapping
//!
//! The virtual keyboard types by key code, so text is translated here.
//! Only the US layout is covered; anything outside it is reported as
//! unmappable and skipped by the injector.

use evdev::Key;

/// Key code and shift requirement for a character, or `None` if the
/// character cannot be produced on a US layout.
pub fn key_for_char(c: char) -> Option<(Key, bool)> {
    let (key, shifted) = match c {
        'a'..='z' => (letter_key(c), false),
        'A'..='Z' => (letter_key(c.to_ascii_lowercase()), true),

        '1' => (Key::KEY_1, false),
        '2' => (Key::KEY_2, false),
        '3' => (Key::KEY_3, false),
        '4' => (Key::KEY_4, false),
        '5' => (Key::KEY_5, false),
        '6' => (Key::KEY_6, false),
        '7' => (Key::KEY_7, false),
        '8' => (Key::KEY_8, false),
        '9' => (Key::KEY_9, false),
        '0' => (Key::KEY_0, false),

        '!' => (Key::KEY_1, true),
        '@' => (Key::KEY_2, true),
        '#' => (Key::KEY_3, true),
        '$' => (Key::KEY_4, true),
        '%' => (Key::KEY_5, true),
        '^' => (Key::KEY_6, true),
        '&' => (Key::KEY_7, true),
        '*' => (Key::KEY_8, true),
        '(' => (Key::KEY_9, true),
        ')' => (Key::KEY_0, true),

        ' ' => (Key::KEY_SPACE, false),
        '\n' => (Key::KEY_ENTER, false),
        '\t' => (Key::KEY_TAB, false),

        '-' => (Key::KEY_MINUS, false),
        '_' => (Key::KEY_MINUS, true),
        '=' => (Key::KEY_EQUAL, false),
        '+' => (Key::KEY_EQUAL, true),
        '[' => (Key::KEY_LEFTBRACE, false),
        '{' => (Key::KEY_LEFTBRACE, true),
        ']' => (Key::KEY_RIGHTBRACE, false),
        '}' => (Key::KEY_RIGHTBRACE, true),
        '\\' => (Key::KEY_BACKSLASH, false),
        '|' => (Key::KEY_BACKSLASH, true),
        ';' => (Key::KEY_SEMICOLON, false),
        ':' => (Key::KEY_SEMICOLON, true),
        '\'' => (Key::KEY_APOSTROPHE, false),
        '"' => (Key::KEY_APOSTROPHE, true),
        ',' => (Key::KEY_COMMA, false),
        '<' => (Key::KEY_COMMA, true),
        '.' => (Key::KEY_DOT, false),
        '>' => (Key::KEY_DOT, true),
        '/' => (Key::KEY_SLASH, false),
        '?' => (Key::KEY_SLASH, true),
        '`' => (Key::KEY_GRAVE, false),
        '~' => (Key::KEY_GRAVE, true),

        _ => return None,
    };
    Some((key, shifted))
}

fn letter_key(c: char) -> Key {
    match c {
        'a' => Key::KEY_A,
        'b' => Key::KEY_B,
        'c' => Key::KEY_C,
        'd' => Key::KEY_D,
        'e' => Key::KEY_E,
        'f' => Key::KEY_F,
        'g' => Key::KEY_G,
        'h' => Key::KEY_H,
        'i' => Key::KEY_I,
        'j' => Key::KEY_J,
        'k' => Key::KEY_K,
        'l' => Key::KEY_L,
        'm' => Key::KEY_M,
        'n' => Key::KEY_N,
        'o' => Key::KEY_O,
        'p' => Key::KEY_P,
        'q' => Key::KEY_Q,
        'r' => Key::KEY_R,
        's' => Key::KEY_S,
        't' => Key::KEY_T,
        'u' => Key::KEY_U,
        'v' => Key::KEY_V,
        'w' => Key::KEY_W,
        'x' => Key::KEY_X,
        'y' => Key::KEY_Y,
        // Only reached with a lowercase ASCII letter
        _ => Key::KEY_Z,
    }
}

/// Every key the virtual keyboard must register, including the
/// modifiers and editing keys the injector uses directly.
pub fn registered_keys() -> Vec<Key> {
    let mut keys = vec![Key::KEY_LEFTSHIFT, Key::KEY_BACKSPACE];
    for c in ('a'..='z')
        .chain('0'..='9')
        .chain([' ', '\n', '\t'])
        .chain("-=[]\\;',./`".chars())
    {
        if let Some((key, _)) = key_for_char(c) {
            keys.push(key);
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letters_and_case() {
        assert_eq!(key_for_char('a'), Some((Key::KEY_A, false)));
        assert_eq!(key_for_char('Z'), Some((Key::KEY_Z, true)));
    }

    #[test]
    fn test_shifted_punctuation() {
        assert_eq!(key_for_char('?'), Some((Key::KEY_SLASH, true)));
        assert_eq!(key_for_char('"'), Some((Key::KEY_APOSTROPHE, true)));
        assert_eq!(key_for_char('!'), Some((Key::KEY_1, true)));
    }

    #[test]
    fn test_whitespace() {
        assert_eq!(key_for_char(' '), Some((Key::KEY_SPACE, false)));
        assert_eq!(key_for_char('\n'), Some((Key::KEY_ENTER, false)));
    }

    #[test]
    fn test_unmappable() {
        assert_eq!(key_for_char('é'), None);
        assert_eq!(key_for_char('😀'), None);
    }

    #[test]
    fn test_registered_keys_cover_every_mapping() {
        let keys = registered_keys();
        for c in (0x20u8..0x7f).map(|b| b as char) {
            if let Some((key, _)) = key_for_char(c) {
                assert!(keys.contains(&key), "missing {:?} for {:?}", key, c);
            }
        }
        assert!(keys.contains(&Key::KEY_BACKSPACE));
        assert!(keys.contains(&Key::KEY_LEFTSHIFT));
    }
}
