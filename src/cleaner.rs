/**
 * Text Cleaner (C1)
 * Normalizes encoding, Unicode, whitespace; strips PDF artifacts; canonicalizes
 * legal abbreviations. Deterministic and idempotent: clean(clean(x)) == clean(x).
 */

use regexes::*;
use unicode_normalization::UnicodeNormalization;

mod regexes {
    use regex::Regex;
    use std::sync::OnceLock;

    macro_rules! static_regex {
        ($name:ident, $pattern:expr) => {
            pub fn $name() -> &'static Regex {
                static RE: OnceLock<Regex> = OnceLock::new();
                RE.get_or_init(|| Regex::new($pattern).expect("valid regex"))
            }
        };
    }

    static_regex!(page_number_line, r"(?m)^\s*\d{1,4}\s*$");
    static_regex!(decorative_separator, r"(?m)^[\-_=]{3,}\s*$");
    static_regex!(
        page_of_pattern,
        r"(?mi)^\s*(p[aá]gina|p[aá]g\.?|page)\s+\d+\s*(de|of|/)?\s*\d*\s*$"
    );
    static_regex!(watermark_controlada, r"(?mi)^\s*(copia\s+)?controlada\s*$");
    static_regex!(watermark_documento_oficial, r"(?mi)^\s*documento\s+oficial\s*$");

    static_regex!(art_abbrev, r"(?i)\bArt\.\s+");
    static_regex!(articulo_word, r"(?i)\bArt[ií]culo\b");
    static_regex!(inc_abbrev, r"(?i)\bInc\.\s+");
    static_regex!(decreto_numero, r"(?i)\bDecreto\s+N[°º]\s*");
    static_regex!(resolucion_numero, r"(?i)\bResoluci[oó]n\s+N[°º]\s*");
    static_regex!(dollar_amount, r"\$\s*(\d)");

    static_regex!(space_variants, r"[\u{00a0}\u{2002}\u{2003}\u{2009}]");
    static_regex!(inline_space_runs, r"[ \t]+");
    static_regex!(excess_blank_lines, r"\n{3,}");
    static_regex!(trailing_inline_space, r"[ \t]+\n");
}

/// Best-effort repair of mojibake produced by a UTF-8 byte stream mis-decoded
/// as Latin-1 and re-encoded as UTF-8. Only applied when the round trip is
/// lossless and actually changes the text, so it never corrupts already-clean
/// input.
fn fix_mojibake(text: &str) -> String {
    let reinterpreted: Option<String> = text
        .chars()
        .map(|c| {
            let code = c as u32;
            if code <= 0xFF {
                Some(code as u8)
            } else {
                None
            }
        })
        .collect::<Option<Vec<u8>>>()
        .and_then(|bytes| String::from_utf8(bytes).ok());

    match reinterpreted {
        Some(fixed) if !fixed.is_empty() && fixed != text => fixed,
        _ => text.to_string(),
    }
}

fn normalize_unicode(text: &str) -> String {
    text.nfkc().collect()
}

fn normalize_whitespace(text: &str) -> String {
    let text = space_variants().replace_all(text, " ");
    let text = inline_space_runs().replace_all(&text, " ");

    let lines: Vec<&str> = text.split('\n').map(|l| l.trim()).collect();
    let joined = lines.join("\n");

    let joined = trailing_inline_space().replace_all(&joined, "\n");
    let joined = excess_blank_lines().replace_all(&joined, "\n\n");

    joined.trim().to_string()
}

fn remove_artifacts(text: &str) -> String {
    let text = page_number_line().replace_all(text, "");
    let text = decorative_separator().replace_all(&text, "");
    let text = page_of_pattern().replace_all(&text, "");
    let text = watermark_controlada().replace_all(&text, "");
    let text = watermark_documento_oficial().replace_all(&text, "");
    text.to_string()
}

fn normalize_legal_text(text: &str) -> String {
    let text = art_abbrev().replace_all(text, "ARTICULO ");
    let text = articulo_word().replace_all(&text, "ARTICULO");
    let text = inc_abbrev().replace_all(&text, "INCISO ");
    let text = decreto_numero().replace_all(&text, "DECRETO ");
    let text = resolucion_numero().replace_all(&text, "RESOLUCION ");
    let text = dollar_amount().replace_all(&text, "pesos $1");
    text.to_string()
}

/// Clean raw extracted text for chunking. Deterministic, idempotent, and
/// never fails: malformed input yields a conservative cleaning rather than
/// an error (spec.md §4.1).
pub fn clean(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let text = fix_mojibake(text);
    let text = normalize_unicode(&text);
    let text = normalize_whitespace(&text);
    let text = remove_artifacts(&text);
    let text = normalize_whitespace(&text);
    normalize_legal_text(&text)
}
