mod flow;
mod fonts;

use std::fmt::Write;

pub use flow::{Cell, Flow, Table};
pub use fonts::Font;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::hex(0x000000);
    pub const WHITE: Color = Color::hex(0xffffff);

    pub const fn hex(value: u32) -> Self {
        Self {
            r: ((value >> 16) & 0xff) as u8,
            g: ((value >> 8) & 0xff) as u8,
            b: (value & 0xff) as u8,
        }
    }

    fn operands(self) -> String {
        format!(
            "{} {} {}",
            number(f32::from(self.r) / 255.0),
            number(f32::from(self.g) / 255.0),
            number(f32::from(self.b) / 255.0)
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    content: String,
}

impl Page {
    pub fn fill_rect(&mut self, x: f32, y: f32, width: f32, height: f32, color: Color) {
        let _ = writeln!(
            self.content,
            "{} rg {} {} {} {} re f",
            color.operands(),
            number(x),
            number(y),
            number(width),
            number(height)
        );
    }

    pub fn stroke_rect(&mut self, x: f32, y: f32, width: f32, height: f32, color: Color) {
        let _ = writeln!(
            self.content,
            "0.5 w {} RG {} {} {} {} re S",
            color.operands(),
            number(x),
            number(y),
            number(width),
            number(height)
        );
    }

    pub fn line(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, color: Color) {
        let _ = writeln!(
            self.content,
            "0.5 w {} RG {} {} m {} {} l S",
            color.operands(),
            number(x1),
            number(y1),
            number(x2),
            number(y2)
        );
    }

    pub fn text(&mut self, font: Font, size: f32, x: f32, y: f32, color: Color, text: &str) {
        let _ = writeln!(
            self.content,
            "BT /{} {} Tf {} rg {} {} Td ({}) Tj ET",
            font.resource(),
            number(size),
            color.operands(),
            number(x),
            number(y),
            escape_text(text)
        );
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    title: String,
    pages: Vec<Page>,
}

impl Document {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            pages: Vec::new(),
        }
    }

    pub fn push_page(&mut self, page: Page) {
        self.pages.push(page);
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn pages_mut(&mut self) -> impl Iterator<Item = &mut Page> {
        self.pages.iter_mut()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let font_base = 3;
        let info_id = font_base + Font::ALL.len();
        let first_page_id = info_id + 1;
        let page_id = |index: usize| first_page_id + index * 2;

        let mut objects: Vec<String> = Vec::new();
        objects.push("<< /Type /Catalog /Pages 2 0 R >>".to_string());

        let kids = (0..self.pages.len())
            .map(|index| format!("{} 0 R", page_id(index)))
            .collect::<Vec<_>>()
            .join(" ");
        objects.push(format!(
            "<< /Type /Pages /Kids [{kids}] /Count {} >>",
            self.pages.len()
        ));

        for font in Font::ALL {
            objects.push(format!(
                "<< /Type /Font /Subtype /Type1 /BaseFont /{} /Encoding /WinAnsiEncoding >>",
                font.base_name()
            ));
        }

        objects.push(format!(
            "<< /Title ({}) /Producer (security-updater) >>",
            escape_text(&self.title)
        ));

        let font_resources = Font::ALL
            .iter()
            .enumerate()
            .map(|(index, font)| format!("/{} {} 0 R", font.resource(), font_base + index))
            .collect::<Vec<_>>()
            .join(" ");

        for (index, page) in self.pages.iter().enumerate() {
            objects.push(format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] \
                 /Resources << /Font << {font_resources} >> >> /Contents {} 0 R >>",
                number(flow::PAGE_WIDTH),
                number(flow::PAGE_HEIGHT),
                page_id(index) + 1
            ));
            objects.push(format!(
                "<< /Length {} >>\nstream\n{}endstream",
                page.content.len(),
                page.content
            ));
        }

        let mut out = String::from("%PDF-1.4\n");
        let mut offsets = Vec::with_capacity(objects.len());
        for (index, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            let _ = write!(out, "{} 0 obj\n{body}\nendobj\n", index + 1);
        }

        let xref_offset = out.len();
        let _ = write!(out, "xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
        for offset in offsets {
            let _ = write!(out, "{offset:010} 00000 n \n");
        }
        let _ = write!(
            out,
            "trailer\n<< /Size {} /Root 1 0 R /Info {info_id} 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
            objects.len() + 1
        );

        out.into_bytes()
    }
}

fn number(value: f32) -> String {
    let text = format!("{value:.2}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    match text {
        "" | "-0" => "0".to_string(),
        other => other.to_string(),
    }
}

pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for character in text.chars() {
        match character {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(character);
            }
            '\t' => out.push_str("    "),
            ' '..='~' => out.push(character),
            other => match win_ansi_code(other) {
                Some(code) => {
                    let _ = write!(out, "\\{code:03o}");
                }
                None => out.push('?'),
            },
        }
    }
    out
}

fn win_ansi_code(character: char) -> Option<u8> {
    let code = match character {
        '\u{20ac}' => 0x80,
        '\u{2026}' => 0x85,
        '\u{2018}' => 0x91,
        '\u{2019}' => 0x92,
        '\u{201c}' => 0x93,
        '\u{201d}' => 0x94,
        '\u{2022}' => 0x95,
        '\u{2013}' => 0x96,
        '\u{2014}' => 0x97,
        '\u{2122}' => 0x99,
        '\u{a0}'..='\u{ff}' => character as u32 as u8,
        _ => return None,
    };
    Some(code)
}
