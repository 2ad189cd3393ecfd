use serde::Serialize;

/// Model families that need request shaping, recognised from the model id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    DeepSeek,
    Gpt5,
    Gemini,
    Claude,
    Other,
}

/// Substring -> family, checked in order. Matching is case-sensitive, the
/// same way OpenRouter spells its model ids.
const FAMILY_MARKERS: &[(&str, ModelFamily)] = &[
    ("deepseek", ModelFamily::DeepSeek),
    ("gpt-5", ModelFamily::Gpt5),
    ("gemini", ModelFamily::Gemini),
    ("claude", ModelFamily::Claude),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    Low,
    High,
}

/// OpenRouter `reasoning` request object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Reasoning {
    Toggle { enabled: bool },
    Effort { effort: Effort },
}

impl ModelFamily {
    pub fn of(model: &str) -> Self {
        FAMILY_MARKERS
            .iter()
            .find(|(marker, _)| model.contains(marker))
            .map(|(_, family)| *family)
            .unwrap_or(ModelFamily::Other)
    }

    /// Reasoning parameters to send, given whether reasoning was requested.
    /// `None` means a plain request.
    pub fn reasoning(&self, requested: bool) -> Option<Reasoning> {
        match (requested, self) {
            (true, ModelFamily::DeepSeek) => Some(Reasoning::Toggle { enabled: true }),
            (true, _) => Some(Reasoning::Effort {
                effort: Effort::High,
            }),
            (false, ModelFamily::Gemini) => Some(Reasoning::Effort { effort: Effort::Low }),
            (false, ModelFamily::Claude) => Some(Reasoning::Toggle { enabled: false }),
            (false, _) => None,
        }
    }
}

/// Directory name for a model's responses: the id after its provider
/// prefix, with `-reasoning` appended when reasoning is on.
pub fn response_dir_name(model: &str, reasoning: bool) -> String {
    let tail = model.rsplit('/').next().unwrap_or(model);
    if reasoning {
        format!("{tail}-reasoning")
    } else {
        tail.to_string()
    }
}
