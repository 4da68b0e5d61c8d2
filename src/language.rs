use once_cell::sync::Lazy;
use regex::Regex;

/// An utterance asking the assistant to reply in another language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageChange {
    /// Code of the language named in the request, when it is one we know.
    /// `None` means the caller should fall back to the detected language.
    pub named: Option<&'static str>,
}

// "speak in French", "hindi mein bolo"... Only a hit when the captured word
// is a known language name; "speak in detail" is an ordinary question.
static NAMED_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\b(?:speak|talk|reply|respond|answer|write|chat)(?:\s+to\s+me|\s+back)?\s+(?:in|using)\s+(?P<lang>\p{L}+)",
        r"(?i)\bswitch\s+(?:over\s+)?to\s+(?P<lang>\p{L}+)",
        r"(?i)\b(?:parle|parlez|réponds|répondez|écris|écrivez)(?:-moi)?\s+en\s+(?P<lang>\p{L}+)",
        r"(?i)\b(?:passe|passez|passons)\s+(?:au|en)\s+(?P<lang>\p{L}+)",
        r"(?i)\b(?:habla|hable|háblame|hábleme|responde|responda|respóndeme|escribe|escriba|escríbeme)\s+en\s+(?P<lang>\p{L}+)",
        r"(?i)\b(?:sprich|sprechen\s+sie|antworte|antworten\s+sie|schreib|schreibe)\s+(?:mit\s+mir\s+)?auf\s+(?P<lang>\p{L}+)",
        r"(?i)\b(?P<lang>\p{L}+)\s+(?:mein|main|mai|me)\s+(?:baat\s+karo|bolo|boliye|jawab\s+do|likho)\b",
        r"(?P<lang>[\p{L}\p{M}]+)\s+में\s+(?:बात\s+करो|बोलो|बोलिए|जवाब\s+दो|लिखो)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

// Requests that mention "language" itself count even without a known name.
static EXPLICIT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\b(?:change|switch|set)\s+(?:the\s+|my\s+|your\s+)?language(?:\s+to\s+(?P<lang>\p{L}+))?",
        r"(?i)\bchange(?:r|z)?\s+(?:de\s+|la\s+)?langue(?:\s+en\s+(?P<lang>\p{L}+))?",
        r"(?i)\bcambia(?:r)?\s+(?:el\s+)?idioma(?:\s+al?\s+(?P<lang>\p{L}+))?",
        r"(?i)\b(?:wechsle|ändere)\s+(?:die\s+)?sprache(?:\s+(?:auf|zu)\s+(?P<lang>\p{L}+))?",
        r"(?i)\bsprache\s+(?:wechseln|ändern)\b",
        r"(?i)\b(?:language|bhasha|bhaasha)\s+(?:badlo|badal\s+do|change\s+karo)\b",
        r"भाषा\s+(?:बदलो|बदल\s+दो|बदलें)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static LANGUAGE_NAMES: &[(&str, &str)] = &[
    ("english", "en"),
    ("anglais", "en"),
    ("inglés", "en"),
    ("ingles", "en"),
    ("englisch", "en"),
    ("angrezi", "en"),
    ("अंग्रेज़ी", "en"),
    ("अंग्रेजी", "en"),
    ("french", "fr"),
    ("français", "fr"),
    ("francais", "fr"),
    ("francés", "fr"),
    ("frances", "fr"),
    ("französisch", "fr"),
    ("spanish", "es"),
    ("español", "es"),
    ("espanol", "es"),
    ("espagnol", "es"),
    ("spanisch", "es"),
    ("german", "de"),
    ("deutsch", "de"),
    ("allemand", "de"),
    ("alemán", "de"),
    ("aleman", "de"),
    ("hindi", "hi"),
    ("हिंदी", "hi"),
    ("हिन्दी", "hi"),
    ("italian", "it"),
    ("italiano", "it"),
    ("italien", "it"),
    ("italienisch", "it"),
    ("portuguese", "pt"),
    ("português", "pt"),
    ("portugues", "pt"),
    ("portugais", "pt"),
    ("chinese", "zh-cn"),
    ("chinois", "zh-cn"),
    ("chino", "zh-cn"),
    ("chinesisch", "zh-cn"),
    ("japanese", "ja"),
    ("japonais", "ja"),
    ("arabic", "ar"),
    ("arabe", "ar"),
    ("russian", "ru"),
    ("russe", "ru"),
    ("bengali", "bn"),
    ("bangla", "bn"),
    ("tamil", "ta"),
    ("telugu", "te"),
    ("marathi", "mr"),
    ("gujarati", "gu"),
    ("punjabi", "pa"),
    ("urdu", "ur"),
    ("kannada", "kn"),
    ("malayalam", "ml"),
];

/// Code for a language name in any of the supported spellings.
pub fn language_code(name: &str) -> Option<&'static str> {
    let name = name
        .trim_matches(|c: char| !c.is_alphanumeric() && !is_combining(c))
        .to_lowercase();
    LANGUAGE_NAMES
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, code)| *code)
}

/// Recognises a "reply in another language" request.
pub fn detect_language_change(text: &str) -> Option<LanguageChange> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    for pattern in NAMED_PATTERNS.iter() {
        for caps in pattern.captures_iter(text) {
            let Some(code) = caps.name("lang").and_then(|m| language_code(m.as_str())) else {
                continue;
            };
            if stands_alone(text, caps.get(0)) {
                return Some(LanguageChange { named: Some(code) });
            }
        }
    }

    EXPLICIT_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(text)
            .filter(|caps| stands_alone(text, caps.get(0)))
            .map(|caps| LanguageChange {
                named: caps.name("lang").and_then(|m| language_code(m.as_str())),
            })
    })
}

/// Words allowed around the request itself ("please", "from now on").
const MAX_SURROUNDING_WORDS: usize = 4;

// "Please answer in English: what documents do I need?" is a question
// that happens to name a language, not a request to switch.
fn stands_alone(text: &str, matched: Option<regex::Match<'_>>) -> bool {
    let Some(m) = matched else {
        return false;
    };
    let surrounding = text[..m.start()]
        .split_whitespace()
        .chain(text[m.end()..].split_whitespace())
        .filter(|word| word.chars().any(char::is_alphanumeric))
        .count();
    surrounding <= MAX_SURROUNDING_WORDS
}

// Devanagari vowel signs and the like sit outside `is_alphanumeric`.
fn is_combining(c: char) -> bool {
    matches!(c, '\u{0900}'..='\u{097F}')
}
