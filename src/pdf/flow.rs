use super::{Color, Document, Font, Page};

pub const PAGE_WIDTH: f32 = 612.0;
pub const PAGE_HEIGHT: f32 = 792.0;
pub const MARGIN: f32 = 54.0;
pub const CONTENT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN;

const LEADING: f32 = 1.3;
const FOOTER_SIZE: f32 = 8.0;
const FOOTER_COLOR: Color = Color::hex(0x7f8c8d);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Align {
    Left,
    Center,
}

#[derive(Debug, Clone)]
pub struct Cell {
    pub text: String,
    pub font: Font,
    pub size: f32,
    pub color: Color,
    pub background: Option<Color>,
    pub align: Align,
}

impl Cell {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            font: Font::Helvetica,
            size: 9.0,
            color: Color::BLACK,
            background: None,
            align: Align::Left,
        }
    }

    pub fn bold(mut self) -> Self {
        self.font = Font::HelveticaBold;
        self
    }

    pub fn monospace(mut self) -> Self {
        self.font = Font::Courier;
        self
    }

    pub fn color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn background(mut self, color: Color) -> Self {
        self.background = Some(color);
        self
    }

    pub fn centered(mut self) -> Self {
        self.align = Align::Center;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    pub widths: Vec<f32>,
    pub rows: Vec<Vec<Cell>>,
    pub padding: f32,
    pub grid: Color,
}

impl Table {
    pub fn new(widths: Vec<f32>) -> Self {
        Self {
            widths,
            rows: Vec::new(),
            padding: 4.0,
            grid: Color::hex(0xbdc3c7),
        }
    }

    pub fn row(mut self, cells: Vec<Cell>) -> Self {
        self.rows.push(cells);
        self
    }
}

pub struct Flow {
    doc: Document,
    page: Page,
    cursor: f32,
}

impl Flow {
    pub fn new(title: &str) -> Self {
        Self {
            doc: Document::new(title),
            page: Page::default(),
            cursor: PAGE_HEIGHT - MARGIN,
        }
    }

    fn bottom() -> f32 {
        MARGIN + FOOTER_SIZE * 2.0
    }

    fn new_page(&mut self) {
        let finished = std::mem::take(&mut self.page);
        self.doc.push_page(finished);
        self.cursor = PAGE_HEIGHT - MARGIN;
    }

    pub fn ensure_space(&mut self, height: f32) {
        if self.cursor - height < Self::bottom() && self.cursor < PAGE_HEIGHT - MARGIN {
            self.new_page();
        }
    }

    pub fn spacer(&mut self, height: f32) {
        if self.cursor - height < Self::bottom() {
            self.new_page();
        } else {
            self.cursor -= height;
        }
    }

    pub fn paragraph(&mut self, text: &str, font: Font, size: f32, color: Color) {
        self.text_block(text, font, size, color, Align::Left);
    }

    pub fn centered(&mut self, text: &str, font: Font, size: f32, color: Color) {
        self.text_block(text, font, size, color, Align::Center);
    }

    fn text_block(&mut self, text: &str, font: Font, size: f32, color: Color, align: Align) {
        let line_height = size * LEADING;
        for line in wrap_words(text, font, size, CONTENT_WIDTH) {
            self.ensure_space(line_height);
            let x = match align {
                Align::Left => MARGIN,
                Align::Center => MARGIN + (CONTENT_WIDTH - font.text_width(size, &line)) / 2.0,
            };
            self.page
                .text(font, size, x, self.cursor - size, color, &line);
            self.cursor -= line_height;
        }
    }

    pub fn banner(&mut self, text: &str, size: f32, background: Color, foreground: Color) {
        let height = size * 2.2;
        self.ensure_space(height);
        let bottom = self.cursor - height;
        self.page
            .fill_rect(MARGIN, bottom, CONTENT_WIDTH, height, background);
        let line = truncate_to_width(text, Font::HelveticaBold, size, CONTENT_WIDTH - 16.0);
        self.page.text(
            Font::HelveticaBold,
            size,
            MARGIN + 8.0,
            bottom + (height - size) / 2.0 + size * 0.2,
            foreground,
            &line,
        );
        self.cursor = bottom;
    }

    pub fn preformatted(&mut self, lines: &[&str], size: f32, background: Color, color: Color) {
        let padding = 4.0;
        let line_height = size * 1.2;
        let columns = (((CONTENT_WIDTH - 2.0 * padding) / (size * 0.6)) as usize).max(1);

        let wrapped: Vec<String> = lines
            .iter()
            .flat_map(|line| wrap_chars(line, columns))
            .collect();

        for line in wrapped {
            self.ensure_space(line_height);
            let top = self.cursor;
            self.page
                .fill_rect(MARGIN, top - line_height, CONTENT_WIDTH, line_height, background);
            self.page.text(
                Font::Courier,
                size,
                MARGIN + padding,
                top - size,
                color,
                &line,
            );
            self.cursor -= line_height;
        }
    }

    pub fn table(&mut self, table: &Table) {
        for row in &table.rows {
            let wrapped: Vec<Vec<String>> = row
                .iter()
                .zip(&table.widths)
                .map(|(cell, width)| {
                    wrap_words(&cell.text, cell.font, cell.size, width - 2.0 * table.padding)
                })
                .collect();

            let height = row
                .iter()
                .zip(&wrapped)
                .map(|(cell, lines)| lines.len().max(1) as f32 * cell.size * LEADING)
                .fold(0.0_f32, f32::max)
                + 2.0 * table.padding;

            self.ensure_space(height);
            let top = self.cursor;
            let mut x = MARGIN;

            for ((cell, lines), width) in row.iter().zip(&wrapped).zip(&table.widths) {
                if let Some(background) = cell.background {
                    self.page.fill_rect(x, top - height, *width, height, background);
                }
                self.page.stroke_rect(x, top - height, *width, height, table.grid);

                let mut baseline = top - table.padding - cell.size;
                for line in lines {
                    let text_x = match cell.align {
                        Align::Left => x + table.padding,
                        Align::Center => {
                            x + (width - cell.font.text_width(cell.size, line)) / 2.0
                        }
                    };
                    self.page
                        .text(cell.font, cell.size, text_x, baseline, cell.color, line);
                    baseline -= cell.size * LEADING;
                }
                x += width;
            }

            self.cursor = top - height;
        }
    }

    pub fn rule(&mut self, color: Color) {
        self.ensure_space(6.0);
        self.cursor -= 3.0;
        self.page
            .line(MARGIN, self.cursor, MARGIN + CONTENT_WIDTH, self.cursor, color);
        self.cursor -= 3.0;
    }

    pub fn finish(mut self) -> Vec<u8> {
        let last = std::mem::take(&mut self.page);
        self.doc.push_page(last);

        let total = self.doc.page_count();
        for (index, page) in self.doc.pages_mut().enumerate() {
            let label = format!("Page {} of {total}", index + 1);
            let width = Font::Helvetica.text_width(FOOTER_SIZE, &label);
            page.text(
                Font::Helvetica,
                FOOTER_SIZE,
                MARGIN + CONTENT_WIDTH - width,
                MARGIN - FOOTER_SIZE,
                FOOTER_COLOR,
                &label,
            );
        }

        self.doc.to_bytes()
    }
}

pub fn wrap_words(text: &str, font: Font, size: f32, width: f32) -> Vec<String> {
    let mut lines = Vec::new();

    for paragraph in text.split('\n') {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{current} {word}")
            };

            if font.text_width(size, &candidate) <= width {
                current = candidate;
                continue;
            }

            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }

            if font.text_width(size, word) <= width {
                current = word.to_string();
            } else {
                let mut pieces = split_to_width(word, font, size, width);
                current = pieces.pop().unwrap_or_default();
                lines.extend(pieces);
            }
        }
        lines.push(current);
    }

    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

fn split_to_width(word: &str, font: Font, size: f32, width: f32) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    for character in word.chars() {
        current.push(character);
        if font.text_width(size, &current) > width && current.chars().count() > 1 {
            current.pop();
            pieces.push(std::mem::take(&mut current));
            current.push(character);
        }
    }
    pieces.push(current);
    pieces
}

fn wrap_chars(line: &str, columns: usize) -> Vec<String> {
    let line = line.trim_end_matches(['\r', '\n']).replace('\t', "    ");
    let chars: Vec<char> = line.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars
        .chunks(columns)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

fn truncate_to_width(text: &str, font: Font, size: f32, width: f32) -> String {
    if font.text_width(size, text) <= width {
        return text.to_string();
    }
    let mut out = String::new();
    for character in text.chars() {
        out.push(character);
        if font.text_width(size, &format!("{out}...")) > width {
            out.pop();
            break;
        }
    }
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::{Flow, wrap_chars, wrap_words};
    use crate::pdf::{Color, Font};

    #[test]
    fn wrap_words_respects_width() {
        let text = "the quick brown fox jumps over the lazy dog ".repeat(10);
        let lines = wrap_words(&text, Font::Helvetica, 10.0, 200.0);
        assert!(lines.len() > 1);
        for line in &lines {
            assert!(Font::Helvetica.text_width(10.0, line) <= 200.0, "{line}");
        }
        assert_eq!(lines.join(" "), text.trim_end());
    }

    #[test]
    fn wrap_words_splits_unbreakable_tokens() {
        let token = "x".repeat(300);
        let lines = wrap_words(&token, Font::Courier, 10.0, 60.0);
        assert!(lines.iter().all(|line| line.chars().count() <= 10));
        assert_eq!(lines.concat(), token);
    }

    #[test]
    fn wrap_chars_keeps_empty_lines() {
        assert_eq!(wrap_chars("", 10), vec![String::new()]);
        assert_eq!(wrap_chars("abcdefghij12", 10), vec!["abcdefghij", "12"]);
    }

    #[test]
    fn long_content_spills_onto_new_pages() {
        let mut flow = Flow::new("Test");
        let lines: Vec<String> = (0..200).map(|n| format!("line {n}")).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        flow.preformatted(&refs, 7.0, Color::hex(0xf4f6f7), Color::BLACK);

        let text = String::from_utf8(flow.finish()).expect("ascii");
        assert!(text.contains("(Page 1 of "));
        assert!(text.contains("(Page 2 of "));
        assert!(text.contains("(line 199) Tj"));
    }
}
