//! 上传 PDF 的 multipart 解析

use axum::extract::Multipart;
use axum::response::Response;
use futures::StreamExt;
use tracing::warn;

use super::errors::bad_request;

/// 解析后的上传内容
#[derive(Debug)]
pub struct PdfUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub target_language: String,
}

/// 读取 `file` 和 `target_language` 字段并校验文件
pub async fn read_pdf_upload(
    mut multipart: Multipart,
    default_language: &str,
) -> Result<PdfUpload, Response> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut target_language: Option<String> = None;

    loop {
        let mut field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!("multipart 解析失败: {}", e);
                return Err(bad_request(e.body_text()));
            }
        };

        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                // 分块读取，避免额外拷贝
                let mut bytes = Vec::new();
                while let Some(chunk) = field.next().await {
                    let chunk = chunk.map_err(|e| bad_request(e.body_text()))?;
                    bytes.extend_from_slice(&chunk);
                }
                file = Some((filename, bytes));
            }
            Some("target_language") => {
                let value = field.text().await.map_err(|e| bad_request(e.body_text()))?;
                target_language = Some(value);
            }
            _ => {}
        }
    }

    let Some((filename, bytes)) = file else {
        return Err(bad_request("No file provided"));
    };
    validate_pdf_filename(&filename).map_err(bad_request)?;

    let target_language = target_language
        .map(|lang| lang.trim().to_string())
        .filter(|lang| !lang.is_empty())
        .unwrap_or_else(|| default_language.to_string());

    Ok(PdfUpload {
        filename,
        bytes,
        target_language,
    })
}

/// 文件名非空且以 `.pdf` 结尾（大小写不敏感）
pub fn validate_pdf_filename(filename: &str) -> Result<(), &'static str> {
    if filename.trim().is_empty() {
        return Err("No file selected");
    }
    if !filename.to_lowercase().ends_with(".pdf") {
        return Err("File must be a PDF");
    }
    Ok(())
}
