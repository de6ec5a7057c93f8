//! Appearance stream synthesis for widgets being flattened

use super::field::FieldKind;

/// Text field flag bit 13
pub const FF_MULTILINE: i64 = 1 << 12;
/// Text field flag bit 14
pub const FF_PASSWORD: i64 = 1 << 13;
/// Text field flag bit 25
pub const FF_COMB: i64 = 1 << 24;

const PADDING: f32 = 2.0;
const MIN_AUTO_FONT_SIZE: f32 = 4.0;
const MAX_AUTO_FONT_SIZE: f32 = 12.0;
const LINE_HEIGHT: f32 = 1.15;
const DEFAULT_FONT: &str = "Helv";

/// Helvetica advance widths for ASCII 0x20..=0x7E, in 1/1000 em
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // '0'..'9'
    278, 278, 584, 584, 584, 556, 1015, // ':'..'@'
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, 667, 778, 722,
    667, 611, 722, 667, 944, 667, 667, 611, // 'A'..'Z'
    278, 278, 278, 469, 556, 333, // '['..'`'
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, 556, 556, 333,
    500, 278, 556, 500, 722, 500, 500, 500, // 'a'..'z'
    334, 260, 334, 584, // '{'..'~'
];
const FALLBACK_WIDTH: u16 = 556;

/// Parsed `/DA` default appearance string
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultAppearance {
    /// Font resource name, without the leading slash
    pub font: String,
    /// Font size; 0 means auto-size
    pub size: f32,
    /// Colour operator with its operands, e.g. `0 g` or `1 0 0 rg`
    pub color: String,
}

impl Default for DefaultAppearance {
    fn default() -> Self {
        Self {
            font: DEFAULT_FONT.to_string(),
            size: 0.0,
            color: "0 g".to_string(),
        }
    }
}

impl DefaultAppearance {
    pub fn parse(da: &[u8]) -> Self {
        let text = String::from_utf8_lossy(da);
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let mut parsed = Self::default();

        for (i, token) in tokens.iter().enumerate() {
            match *token {
                "Tf" if i >= 2 => {
                    if let Some(font) = tokens[i - 2].strip_prefix('/') {
                        parsed.font = font.to_string();
                    }
                    parsed.size = tokens[i - 1].parse().unwrap_or(0.0);
                }
                "g" | "rg" | "k" => {
                    let arity = match *token {
                        "g" => 1,
                        "rg" => 3,
                        _ => 4,
                    };
                    if i >= arity {
                        parsed.color = tokens[i - arity..=i].join(" ");
                    }
                }
                _ => {}
            }
        }
        parsed
    }
}

/// Width of `text` in Helvetica at `size` points
pub fn text_width(text: &str, size: f32) -> f32 {
    let units: u32 = text
        .chars()
        .map(|c| match c as u32 {
            code @ 0x20..=0x7E => HELVETICA_WIDTHS[(code - 0x20) as usize] as u32,
            _ => FALLBACK_WIDTH as u32,
        })
        .sum();
    units as f32 * size / 1000.0
}

/// Format a number for a content stream: at most four decimals, no trailing zeros
pub fn num(value: f32) -> String {
    let rounded = (value * 10_000.0).round() / 10_000.0;
    if rounded == rounded.trunc() {
        format!("{}", rounded as i64)
    } else {
        let s = format!("{:.4}", rounded);
        s.trim_end_matches('0').to_string()
    }
}

/// Colour operator for `/MK` colour components; an empty array means transparent
pub fn color_op(components: &[f32], stroke: bool) -> Option<String> {
    let op = match (components.len(), stroke) {
        (1, false) => "g",
        (1, true) => "G",
        (3, false) => "rg",
        (3, true) => "RG",
        (4, false) => "k",
        (4, true) => "K",
        _ => return None,
    };
    let operands: Vec<String> = components.iter().map(|c| num(*c)).collect();
    Some(format!("{} {}", operands.join(" "), op))
}

/// Background fill and border stroke drawn beneath a widget's content
pub fn frame(
    width: f32,
    height: f32,
    background: Option<&[f32]>,
    border: Option<&[f32]>,
    border_width: f32,
) -> Vec<u8> {
    let mut ops = String::new();
    if let Some(fill) = background.and_then(|c| color_op(c, false)) {
        ops.push_str(&format!(
            "q {} 0 0 {} {} re f Q\n",
            fill,
            num(width),
            num(height)
        ));
    }
    if let Some(stroke) = border.and_then(|c| color_op(c, true)) {
        if border_width > 0.0 {
            let inset = border_width / 2.0;
            ops.push_str(&format!(
                "q {} {} w {} {} {} {} re S Q\n",
                stroke,
                num(border_width),
                num(inset),
                num(inset),
                num((width - border_width).max(0.0)),
                num((height - border_width).max(0.0))
            ));
        }
    }
    ops.into_bytes()
}

/// Encode text as a WinAnsi literal string, escaped for a content stream
pub fn literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('(');
    for c in text.chars() {
        let byte = win_ansi_byte(c);
        match byte {
            b'(' | b')' | b'\\' => {
                out.push('\\');
                out.push(byte as char);
            }
            0x20..=0x7E => out.push(byte as char),
            _ => out.push_str(&format!("\\{:03o}", byte)),
        }
    }
    out.push(')');
    out
}

fn win_ansi_byte(c: char) -> u8 {
    match c as u32 {
        code @ (0x20..=0x7E | 0xA0..=0xFF) => code as u8,
        0x20AC => 0x80,
        0x201A => 0x82,
        0x0192 => 0x83,
        0x201E => 0x84,
        0x2026 => 0x85,
        0x2020 => 0x86,
        0x2021 => 0x87,
        0x2030 => 0x89,
        0x0160 => 0x8A,
        0x2039 => 0x8B,
        0x0152 => 0x8C,
        0x017D => 0x8E,
        0x2018 => 0x91,
        0x2019 => 0x92,
        0x201C => 0x93,
        0x201D => 0x94,
        0x2022 => 0x95,
        0x2013 => 0x96,
        0x2014 => 0x97,
        0x2122 => 0x99,
        0x0161 => 0x9A,
        0x203A => 0x9B,
        0x0153 => 0x9C,
        0x017E => 0x9E,
        0x0178 => 0x9F,
        _ => b'?',
    }
}

/// Everything needed to lay out a text field's value inside its widget box
#[derive(Debug, Clone)]
pub struct TextLayout<'a> {
    pub text: &'a str,
    pub appearance: DefaultAppearance,
    pub width: f32,
    pub height: f32,
    /// 0 left, 1 centred, 2 right
    pub quadding: i64,
    pub flags: i64,
    pub max_len: Option<i64>,
}

impl TextLayout<'_> {
    fn is_multiline(&self) -> bool {
        self.flags & FF_MULTILINE != 0
    }

    fn comb_cells(&self) -> Option<usize> {
        let is_comb = self.flags & FF_COMB != 0
            && self.flags & (FF_MULTILINE | FF_PASSWORD) == 0;
        match self.max_len {
            Some(n) if is_comb && n > 0 => Some(n as usize),
            _ => None,
        }
    }

    fn display_text(&self) -> String {
        if self.flags & FF_PASSWORD != 0 {
            "*".repeat(self.text.chars().count())
        } else {
            self.text.to_string()
        }
    }

    fn font_size(&self, lines: &[String]) -> f32 {
        if self.appearance.size > 0.0 {
            return self.appearance.size;
        }
        if self.is_multiline() {
            return MAX_AUTO_FONT_SIZE;
        }
        let inner_w = (self.width - 2.0 * PADDING).max(1.0);
        let inner_h = (self.height - 2.0 * PADDING).max(1.0);
        let mut size = (inner_h / LINE_HEIGHT).min(MAX_AUTO_FONT_SIZE);
        let widest = lines
            .iter()
            .map(|l| text_width(l, size))
            .fold(0.0_f32, f32::max);
        if widest > inner_w {
            size *= inner_w / widest;
        }
        size.max(MIN_AUTO_FONT_SIZE)
    }

    fn wrap(&self, text: &str, size: f32) -> Vec<String> {
        let max_w = (self.width - 2.0 * PADDING).max(1.0);
        let mut lines = Vec::new();
        for paragraph in text.split(['\r', '\n']) {
            let mut line = String::new();
            for word in paragraph.split(' ') {
                let candidate = if line.is_empty() {
                    word.to_string()
                } else {
                    format!("{} {}", line, word)
                };
                if !line.is_empty() && text_width(&candidate, size) > max_w {
                    lines.push(std::mem::take(&mut line));
                    line = word.to_string();
                } else {
                    line = candidate;
                }
            }
            lines.push(line);
        }
        lines
    }

    /// Content stream drawing the text, marked as variable text (`/Tx BMC`)
    pub fn content(&self) -> Vec<u8> {
        let text = self.display_text();
        let da = &self.appearance;
        let mut ops = String::new();
        ops.push_str("/Tx BMC\nq\n");
        ops.push_str(&format!(
            "1 1 {} {} re W n\n",
            num((self.width - 2.0).max(0.0)),
            num((self.height - 2.0).max(0.0))
        ));
        ops.push_str("BT\n");

        if let Some(cells) = self.comb_cells() {
            let size = self.font_size(std::slice::from_ref(&text));
            ops.push_str(&format!("/{} {} Tf {}\n", da.font, num(size), da.color));
            let cell_w = self.width / cells as f32;
            let y = (self.height - size) / 2.0 + size * 0.22;
            for (i, c) in text.chars().take(cells).enumerate() {
                let glyph = c.to_string();
                let x = cell_w * i as f32 + (cell_w - text_width(&glyph, size)) / 2.0;
                ops.push_str(&format!(
                    "1 0 0 1 {} {} Tm {} Tj\n",
                    num(x),
                    num(y),
                    literal(&glyph)
                ));
            }
        } else {
            let (size, lines) = if self.is_multiline() {
                let size = self.font_size(&[]);
                (size, self.wrap(&text, size))
            } else {
                let line = text.replace(['\r', '\n'], " ");
                let size = self.font_size(std::slice::from_ref(&line));
                (size, vec![line])
            };
            ops.push_str(&format!("/{} {} Tf {}\n", da.font, num(size), da.color));

            let leading = size * LINE_HEIGHT;
            let first_baseline = if self.is_multiline() {
                self.height - PADDING - size
            } else {
                (self.height - size) / 2.0 + size * 0.22
            };
            for (i, line) in lines.iter().enumerate() {
                let line_w = text_width(line, size);
                let x = match self.quadding {
                    1 => (self.width - line_w) / 2.0,
                    2 => self.width - PADDING - line_w,
                    _ => PADDING,
                };
                let y = first_baseline - leading * i as f32;
                ops.push_str(&format!(
                    "1 0 0 1 {} {} Tm {} Tj\n",
                    num(x),
                    num(y),
                    literal(line)
                ));
            }
        }

        ops.push_str("ET\nQ\nEMC\n");
        ops.into_bytes()
    }
}

/// Mark drawn for an "on" button widget that has no appearance of its own
pub fn button_mark(kind: FieldKind, width: f32, height: f32) -> Vec<u8> {
    let ops = match kind {
        FieldKind::RadioButton => {
            let r = width.min(height) * 0.3;
            let (cx, cy) = (width / 2.0, height / 2.0);
            let k = r * 0.5523;
            format!(
                "q 0 g\n{} {} m\n{} {} {} {} {} {} c\n{} {} {} {} {} {} c\n{} {} {} {} {} {} c\n{} {} {} {} {} {} c\nf\nQ\n",
                num(cx + r), num(cy),
                num(cx + r), num(cy + k), num(cx + k), num(cy + r), num(cx), num(cy + r),
                num(cx - k), num(cy + r), num(cx - r), num(cy + k), num(cx - r), num(cy),
                num(cx - r), num(cy - k), num(cx - k), num(cy - r), num(cx), num(cy - r),
                num(cx + k), num(cy - r), num(cx + r), num(cy - k), num(cx + r), num(cy),
            )
        }
        _ => format!(
            "q 0 G 1.5 w\n{} {} m\n{} {} l\n{} {} l\nS\nQ\n",
            num(width * 0.2),
            num(height * 0.5),
            num(width * 0.4),
            num(height * 0.25),
            num(width * 0.8),
            num(height * 0.8)
        ),
    };
    ops.into_bytes()
}
