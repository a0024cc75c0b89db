//! PDF 文本抽取
//!
//! 使用 `lopdf` 逐页抽取文本，抽取失败的页面跳过。

use lopdf::Document;
use tracing::{debug, warn};

use crate::error::PipelineError;

/// 逐页抽取文本，返回 (页码, 文本)
pub fn extract_pages(pdf_bytes: &[u8]) -> Result<Vec<(u32, String)>, PipelineError> {
    let doc = Document::load_mem(pdf_bytes).map_err(|e| PipelineError::PdfLoad(e.to_string()))?;

    let mut pages = Vec::new();
    for (page_num, _) in doc.get_pages() {
        match doc.extract_text(&[page_num]) {
            Ok(text) => pages.push((page_num, text.trim().to_string())),
            Err(e) => warn!("第 {} 页文本抽取失败: {}", page_num, e),
        }
    }

    debug!("PDF 共抽取 {} 页", pages.len());
    Ok(pages)
}

/// 各页以换行拼接，跳过空页；没有任何文本时返回 `EmptyDocument`
pub fn join_pages(pages: &[(u32, String)]) -> Result<String, PipelineError> {
    let combined = pages
        .iter()
        .map(|(_, text)| text.as_str())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    if combined.trim().is_empty() {
        return Err(PipelineError::EmptyDocument);
    }
    Ok(combined)
}
