//! 文档生成
//!
//! 先把结果整理成纯文本行，再由 `DocumentBuilder` 渲染成文件。
//! `DocxBuilder` 直接用 `zip` 写出最小的 WordprocessingML 包。

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::error::PipelineError;
use crate::models::{labels_for, GeneratedMcq, TranslatedQuestion};

pub const SEPARATOR: &str = "═══";

pub const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

pub trait DocumentBuilder: Send + Sync {
    /// 渲染文档，返回文件字节
    fn build(&self, title: &str, lines: &[String]) -> Result<Vec<u8>, PipelineError>;

    /// 输出文件扩展名（不含点）
    fn extension(&self) -> &'static str;

    fn content_type(&self) -> &'static str;
}

/// 解题文档的文本行
pub fn solution_display_lines(items: &[TranslatedQuestion], language: &str) -> Vec<String> {
    let labels = labels_for(language);
    let mut lines = vec![format!("**{}**", labels.title), String::new()];

    for (idx, item) in items.iter().enumerate() {
        let number = if item.original.question_number.is_empty() {
            (idx + 1).to_string()
        } else {
            item.original.question_number.clone()
        };
        let question = item.display_question().trim();
        let answer = item.display_answer_text().trim();
        let explanation = item.display_explanation().trim();
        if question.is_empty() && answer.is_empty() && explanation.is_empty() {
            continue;
        }

        lines.push(format!("**Question {}:**", number));
        lines.push(String::new());
        if !question.is_empty() {
            lines.push(question.to_string());
            lines.push(String::new());
        }

        let answer_option = item.original.answer_option.as_deref();
        let options = item.display_options();
        if !options.is_empty() {
            for opt in options {
                let text = opt.text.trim();
                if text.is_empty() {
                    continue;
                }
                if answer_option == Some(opt.label.trim()) {
                    lines.push(format!("✓ {}) {}", opt.label.trim(), text));
                } else {
                    lines.push(format!("{}) {}", opt.label.trim(), text));
                }
            }
            lines.push(String::new());
        }

        match answer_option {
            Some(label) => lines.push(format!("{}: {}", labels.answer, label)),
            None if !answer.is_empty() => lines.push(format!("{}: {}", labels.answer, answer)),
            None => {}
        }
        lines.push(String::new());

        if !explanation.is_empty() {
            lines.push(format!("{}: {}", labels.explanation, explanation));
        }
        lines.push(SEPARATOR.to_string());
    }

    lines
}

/// 选择题文档的文本行
pub fn mcq_display_lines(topic: &str, language: &str, mcqs: &[GeneratedMcq]) -> Vec<String> {
    let mut lines = vec![format!("MCQs on: {} ({})", topic, language), String::new()];

    for (idx, mcq) in mcqs.iter().enumerate() {
        lines.push(format!("Question {}: {}", idx + 1, mcq.question));
        for opt in &mcq.options {
            lines.push(format!("{}. {}", opt.label, opt.text));
        }
        lines.push(format!("Correct Answer: {}", mcq.answer));
        lines.push(format!("Explanation: {}", mcq.explanation));
        lines.push(SEPARATOR.to_string());
    }

    lines
}

/// 段落样式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineStyle {
    Heading,
    Correct,
    Separator,
    Option,
    Plain,
}

fn classify_line(line: &str) -> LineStyle {
    let trimmed = line.trim();
    if trimmed.starts_with("**") || trimmed.starts_with("Question ") {
        LineStyle::Heading
    } else if trimmed.starts_with('✓') {
        LineStyle::Correct
    } else if trimmed.starts_with(SEPARATOR) {
        LineStyle::Separator
    } else if trimmed.len() > 1
        && trimmed.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && matches!(trimmed.chars().nth(1), Some(')') | Some('.'))
    {
        LineStyle::Option
    } else {
        LineStyle::Plain
    }
}

/// DOCX 渲染器
#[derive(Debug, Clone, Copy, Default)]
pub struct DocxBuilder;

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

impl DocxBuilder {
    fn paragraph(text: &str, style: LineStyle) -> String {
        let clean = text.trim().replace("**", "");
        let (ppr, rpr, body) = match style {
            LineStyle::Heading => (
                "",
                r#"<w:b/><w:color w:val="0000FF"/><w:sz w:val="28"/>"#,
                clean,
            ),
            LineStyle::Correct => ("", r#"<w:b/><w:color w:val="008000"/>"#, clean),
            LineStyle::Separator => ("", "", "_".repeat(60)),
            LineStyle::Option => (r#"<w:ind w:left="360"/>"#, "", clean),
            LineStyle::Plain => ("", "", clean),
        };
        format!(
            r#"<w:p><w:pPr>{ppr}</w:pPr><w:r><w:rPr>{rpr}</w:rPr><w:t xml:space="preserve">{}</w:t></w:r></w:p>"#,
            xml_escape(&body)
        )
    }

    fn document_xml(title: &str, lines: &[String]) -> String {
        let mut body = String::new();
        body.push_str(&format!(
            r#"<w:p><w:pPr><w:jc w:val="center"/></w:pPr><w:r><w:rPr><w:b/><w:sz w:val="36"/></w:rPr><w:t xml:space="preserve">{}</w:t></w:r></w:p>"#,
            xml_escape(title)
        ));
        for line in lines {
            if line.trim().is_empty() {
                body.push_str("<w:p/>");
            } else {
                body.push_str(&Self::paragraph(line, classify_line(line)));
            }
        }
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
        )
    }
}

impl DocumentBuilder for DocxBuilder {
    fn build(&self, title: &str, lines: &[String]) -> Result<Vec<u8>, PipelineError> {
        let doc_err = |e: &dyn std::fmt::Display| PipelineError::Document(e.to_string());

        let mut zip_writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .compression_level(Some(6));

        let parts = [
            ("[Content_Types].xml", CONTENT_TYPES_XML.to_string()),
            ("_rels/.rels", ROOT_RELS_XML.to_string()),
            ("word/document.xml", Self::document_xml(title, lines)),
        ];
        for (name, content) in parts {
            zip_writer.start_file(name, options).map_err(|e| doc_err(&e))?;
            zip_writer
                .write_all(content.as_bytes())
                .map_err(|e| doc_err(&e))?;
        }

        let cursor = zip_writer.finish().map_err(|e| doc_err(&e))?;
        Ok(cursor.into_inner())
    }

    fn extension(&self) -> &'static str {
        "docx"
    }

    fn content_type(&self) -> &'static str {
        DOCX_CONTENT_TYPE
    }
}

/// 转义 XML 特殊字符，并去掉 XML 1.0 不允许的控制字符
fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' | '\n' | '\r' => out.push(c),
            c if (c as u32) < 0x20 => {}
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QuestionOption, SolveMethod, SolvedQuestion};
    use std::io::Read;

    fn solved() -> SolvedQuestion {
        SolvedQuestion {
            question_number: "31".into(),
            question_text: "What is 2+2?".into(),
            options: vec![QuestionOption::new("1", "3"), QuestionOption::new("2", "4")],
            answer_option: Some("2".into()),
            answer_text: "4".into(),
            explanation: "Two plus two is four.".into(),
            section: None,
            method_used: SolveMethod::AnswerKey,
        }
    }

    #[test]
    fn test_solution_lines_mark_correct_option() {
        let item = TranslatedQuestion::untranslated(solved(), "English", None);
        let lines = solution_display_lines(&[item], "English");
        assert_eq!(lines[0], "**Solved Question Paper**");
        assert!(lines.contains(&"**Question 31:**".to_string()));
        assert!(lines.contains(&"1) 3".to_string()));
        assert!(lines.contains(&"✓ 2) 4".to_string()));
        assert!(lines.contains(&"Answer: 2".to_string()));
        assert!(lines.contains(&"Explanation: Two plus two is four.".to_string()));
        assert_eq!(lines.last().map(String::as_str), Some(SEPARATOR));
    }

    #[test]
    fn test_solution_lines_use_language_labels() {
        let item = TranslatedQuestion::untranslated(solved(), "Hindi", None);
        let lines = solution_display_lines(&[item], "Hindi");
        assert!(lines.contains(&"उत्तर: 2".to_string()));
    }

    #[test]
    fn test_mcq_lines() {
        let mcq = GeneratedMcq {
            question: "1/2 + 1/2?".into(),
            options: vec![QuestionOption::new("A", "1"), QuestionOption::new("B", "2")],
            answer: "A".into(),
            explanation: "Halves.".into(),
        };
        let lines = mcq_display_lines("Fractions", "English", &[mcq]);
        assert_eq!(
            lines,
            vec![
                "MCQs on: Fractions (English)",
                "",
                "Question 1: 1/2 + 1/2?",
                "A. 1",
                "B. 2",
                "Correct Answer: A",
                "Explanation: Halves.",
                SEPARATOR,
            ]
        );
    }

    #[test]
    fn test_docx_is_a_zip_with_document_part() {
        let lines = vec!["**Question 1:**".to_string(), "a < b & c".to_string()];
        let bytes = DocxBuilder.build("Title", &lines).unwrap();
        assert_eq!(&bytes[..2], b"PK");

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut xml = String::new();
        archive
            .by_name("word/document.xml")
            .unwrap()
            .read_to_string(&mut xml)
            .unwrap();
        assert!(xml.contains("a &lt; b &amp; c"));
        assert!(xml.contains("Question 1:"));
        assert!(archive.by_name("[Content_Types].xml").is_ok());
    }

    #[test]
    fn test_classify_line() {
        assert_eq!(classify_line("**Question 3:**"), LineStyle::Heading);
        assert_eq!(classify_line("✓ 2) 4"), LineStyle::Correct);
        assert_eq!(classify_line("═══"), LineStyle::Separator);
        assert_eq!(classify_line("A. option"), LineStyle::Option);
        assert_eq!(classify_line("Explanation: x"), LineStyle::Plain);
    }
}
