//! Helvetica font metrics.
//!
//! Standard-14 fonts carry no embedded widths; Helvetica's AFM advance
//! widths are standardized, so centering and fit checks use this table
//! directly.

/// Advance widths for ASCII 32..=126 in 1/1000 em, from the Helvetica AFM.
const ASCII_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // '0'..'9'
    278, 278, 584, 584, 584, 556, 1015, // ':'..'@'
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, 667, // 'A'..'P'
    778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // 'Q'..'Z'
    278, 278, 278, 469, 556, 333, // '['..'`'
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, 556, // 'a'..'p'
    556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // 'q'..'z'
    334, 260, 334, 584, // '{'..'~'
];

/// Fallback width for characters outside the table.
const DEFAULT_WIDTH: u16 = 556;

/// Advance width of one character in 1/1000 em.
#[must_use]
pub fn char_width(c: char) -> u16 {
    let code = c as u32;
    if (32..=126).contains(&code) {
        ASCII_WIDTHS[(code - 32) as usize]
    } else {
        DEFAULT_WIDTH
    }
}

/// Width of a string at the given font size, in points.
#[must_use]
pub fn text_width(text: &str, font_size: f64) -> f64 {
    let units: u64 = text.chars().map(|c| u64::from(char_width(c))).sum();
    #[allow(clippy::cast_precision_loss)]
    let units = units as f64;
    units * font_size / 1000.0
}
