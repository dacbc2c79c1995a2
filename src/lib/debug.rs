use crate::compositor::CaptionLayout;
use crate::glyphs::{classify, Run};

/// Escapes a string for use inside a JSON string literal.
fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\t' => escaped.push_str("\\t"),
            c if (c as u32) < 0x20 => escaped.push_str(&format!("\\u{:04x}", c as u32)),
            c => escaped.push(c),
        }
    }
    escaped
}

fn run_to_readable_json(run: &Run, indent: &str) -> String {
    let kind = match run {
        Run::Text(_) => "Text",
        Run::StandardGlyph(_) => "StandardGlyph",
        Run::PlatformGlyph(_) => "PlatformGlyph",
    };
    format!(
        "{}{{ \"type\": \"{}\", \"content\": \"{}\" }}",
        indent,
        kind,
        escape(run.as_str())
    )
}

impl CaptionLayout {
    /// Saves the layout to a JSON file for inspection.
    ///
    /// # Example
    /// ```no_run
    /// use captioncard::compositor::CaptionLayout;
    /// use captioncard::fonts::NativeFont;
    /// use captioncard::measure::GlyphOptions;
    ///
    /// let font = NativeFont::bundled(33.0).unwrap();
    /// let layout = CaptionLayout::compute("Hello 😀 world", &font, 400, 2.5, &GlyphOptions::default());
    /// layout.save_to_json_file("layout.json").unwrap();
    /// ```
    pub fn save_to_json_file(&self, file_path: &str) -> std::io::Result<()> {
        std::fs::write(file_path, self.to_readable_json())?;
        Ok(())
    }

    /// Converts the layout into indented JSON, each line with its runs and origin.
    pub fn to_readable_json(&self) -> String {
        let mut result = String::from("{\n");
        result.push_str(&format!("  \"width\": {},\n", self.width));
        result.push_str(&format!("  \"font_size\": {},\n", self.font_size));
        result.push_str(&format!("  \"line_spacing\": {:?},\n", self.line_spacing));
        result.push_str(&format!("  \"padding\": {},\n", self.padding));
        result.push_str(&format!("  \"banner_height\": {},\n", self.banner_height()));
        result.push_str("  \"lines\": [");

        for (i, line) in self.lines.iter().enumerate() {
            let (x, y) = self.line_origin(i);
            result.push_str(if i == 0 { "\n" } else { ",\n" });
            result.push_str("    {\n");
            result.push_str(&format!("      \"text\": \"{}\",\n", escape(line)));
            result.push_str(&format!(
                "      \"width\": {},\n",
                self.line_widths.get(i).copied().unwrap_or(0)
            ));
            result.push_str(&format!("      \"x\": {},\n", x));
            result.push_str(&format!("      \"y\": {},\n", y));
            result.push_str("      \"runs\": [\n");

            let runs = classify(line);
            for (j, run) in runs.iter().enumerate() {
                result.push_str(&run_to_readable_json(run, "        "));
                if j + 1 < runs.len() {
                    result.push(',');
                }
                result.push('\n');
            }
            result.push_str("      ]\n");
            result.push_str("    }");
        }

        if self.lines.is_empty() {
            result.push_str("]\n");
        } else {
            result.push_str("\n  ]\n");
        }
        result.push('}');
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> CaptionLayout {
        CaptionLayout {
            lines: vec!["say \"hi\" 😀".to_string(), "bye".to_string()],
            line_widths: vec![120, 40],
            font_size: 33,
            line_spacing: 2.5,
            padding: 14,
            width: 400,
        }
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("a\"b"), "a\\\"b");
        assert_eq!(escape("back\\slash"), "back\\\\slash");
        assert_eq!(escape("line\nbreak"), "line\\nbreak");
        assert_eq!(escape("\u{1}"), "\\u0001");
    }

    #[test]
    fn test_to_readable_json() {
        let json = layout().to_readable_json();
        assert!(json.starts_with('{'));
        assert!(json.ends_with('}'));
        assert!(json.contains("\"banner_height\": 96"));
        assert!(json.contains("\"text\": \"say \\\"hi\\\" 😀\""));
        assert!(json.contains("\"type\": \"StandardGlyph\""));
        assert!(json.contains("\"x\": 140"));
        assert_eq!(json.matches("\"text\":").count(), 2);
    }

    #[test]
    fn test_empty_layout_json() {
        let empty = CaptionLayout {
            lines: vec![],
            line_widths: vec![],
            ..layout()
        };
        assert!(empty.to_readable_json().contains("\"lines\": []"));
    }

    #[test]
    fn test_save_to_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.json");
        layout().save_to_json_file(path.to_str().unwrap()).unwrap();
        let saved = std::fs::read_to_string(&path).unwrap();
        assert_eq!(saved, layout().to_readable_json());
    }
}
