/// 支持的目标语言（显示名称, ISO 代码）
pub const LANGUAGES: &[(&str, &str)] = &[
    ("English", "en"),
    ("Hindi", "hi"),
    ("Bengali", "bn"),
    ("Telugu", "te"),
    ("Marathi", "mr"),
    ("Tamil", "ta"),
    ("Gujarati", "gu"),
    ("Kannada", "kn"),
    ("Odia", "or"),
    ("Malayalam", "ml"),
    ("Punjabi", "pa"),
    ("Assamese", "as"),
    ("Urdu", "ur"),
];

/// 根据显示名称获取语言代码（大小写不敏感）
pub fn language_code(name: &str) -> Option<&'static str> {
    LANGUAGES
        .iter()
        .find(|(label, _)| label.eq_ignore_ascii_case(name.trim()))
        .map(|(_, code)| *code)
}

/// 解答文档中使用的标签
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolutionLabels {
    pub answer: &'static str,
    pub explanation: &'static str,
    pub title: &'static str,
}

/// 获取语言对应的标签，未收录的语言使用英文
pub fn labels_for(language: &str) -> SolutionLabels {
    match language.trim().to_lowercase().as_str() {
        "telugu" => SolutionLabels {
            answer: "సమాధానం",
            explanation: "వివరణ",
            title: "తెలుగులో అనువదించిన ప్రశ్నపత్రం",
        },
        "hindi" => SolutionLabels {
            answer: "उत्तर",
            explanation: "व्याख्या",
            title: "हिंदी में अनुवादित प्रश्नपत्र",
        },
        "odia" => SolutionLabels {
            answer: "ଉତ୍ତର",
            explanation: "ବ୍ୟାଖ୍ୟା",
            title: "ଓଡ଼ିଆରେ ଅନୁବାଦିତ ପ୍ରଶ୍ନପତ୍ର",
        },
        "tamil" => SolutionLabels {
            answer: "பதில்",
            explanation: "விரிவுரை",
            title: "தமிழில் மொழிபெயர்த்த கேள்வித்தாள்",
        },
        "kannada" => SolutionLabels {
            answer: "ಉತ್ತರ",
            explanation: "ವಿವರಣೆ",
            title: "ಕನ್ನಡದಲ್ಲಿ ಅನುವಾದಿತ ಪ್ರಶ್ನೆ ಪತ್ರಿಕೆ",
        },
        _ => SolutionLabels {
            answer: "Answer",
            explanation: "Explanation",
            title: "Solved Question Paper",
        },
    }
}
