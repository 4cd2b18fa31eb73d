/**
 * Enricher (C3)
 * Pure, deterministic derivation of per-chunk metadata: section type,
 * language, has-amounts, has-tables, coarse entities, content hash.
 */

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    Decree,
    Resolution,
    Tender,
    Subsidy,
    Appointment,
    Budget,
    General,
}

impl SectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionType::Decree => "decree",
            SectionType::Resolution => "resolution",
            SectionType::Tender => "tender",
            SectionType::Subsidy => "subsidy",
            SectionType::Appointment => "appointment",
            SectionType::Budget => "budget",
            SectionType::General => "general",
        }
    }
}

impl std::fmt::Display for SectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EnrichContext {
    /// Caller-supplied topic tag; the enricher never derives this itself.
    pub topic: Option<String>,
    /// Overrides the default "es" language when the caller already knows it.
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub chunk_hash: String,
    pub section_type: SectionType,
    pub language: String,
    pub has_tables: bool,
    pub has_amounts: bool,
    pub entities: Option<HashMap<String, Vec<String>>>,
    pub topic: Option<String>,
}

fn section_patterns() -> &'static [(SectionType, &'static [&'static str])] {
    // Kept as raw strings here; compiled lazily in `compiled_section_patterns`.
    const RAW: &[(SectionType, &[&str])] = &[
        (
            SectionType::Decree,
            &[r"(?i)\bDECRETO\s+\d+", r"(?i)\bDecreto\s+N[°º]"],
        ),
        (
            SectionType::Resolution,
            &[
                r"(?i)\bRESOLUCI[OÓ]N\s+\d+",
                r"(?i)\bResoluci[oó]n\s+N[°º]",
            ],
        ),
        (
            SectionType::Tender,
            &[
                r"(?i)\blicitaci[oó]n\b",
                r"(?i)\bconcurso\s+de\s+precios\b",
                r"(?i)\badquisici[oó]n\b",
                r"(?i)\bprovisi[oó]n\b",
            ],
        ),
        (
            SectionType::Subsidy,
            &[
                r"(?i)\bsubsidio\b",
                r"(?i)\bayuda\s+econ[oó]mica\b",
                r"(?i)\basistencia\s+financiera\b",
            ],
        ),
        (
            SectionType::Appointment,
            &[
                r"(?i)\bdesign[aá]",
                r"(?i)\bnombramiento\b",
                r"(?i)\baprueba\s+la\s+designaci[oó]n\b",
            ],
        ),
        (
            SectionType::Budget,
            &[
                r"(?i)\bpresupuesto\b",
                r"(?i)\bpartida\s+presupuestaria\b",
                r"(?i)\bcr[eé]dito\s+presupuestario\b",
            ],
        ),
    ];
    RAW
}

fn compiled_section_patterns() -> &'static [(SectionType, Vec<Regex>)] {
    static COMPILED: OnceLock<Vec<(SectionType, Vec<Regex>)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        section_patterns()
            .iter()
            .map(|(section, patterns)| {
                (
                    *section,
                    patterns
                        .iter()
                        .map(|p| Regex::new(p).expect("valid section regex"))
                        .collect(),
                )
            })
            .collect()
    })
}

fn amount_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"\$\s*\d+",
            r"(?i)pesos\s+\d+",
            r"\d+\s*pesos",
            r"\$\d+[.,]\d+",
            r"(?i)ARS\s*\d+",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid amount regex"))
        .collect()
    })
}

fn table_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [r"\t", r"\n\s{4,}\S", r"\|\s*\w+\s*\|"]
            .iter()
            .map(|p| Regex::new(p).expect("valid table regex"))
            .collect()
    })
}

fn organism_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b([A-Z][a-zA-Z\u{00C0}-\u{00FF}]+(?:\s+[A-Z][a-zA-Z\u{00C0}-\u{00FF}]+)*)\s+(?:de|del|Provincia|Municipal)")
            .expect("valid organism regex")
    })
}

fn person_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b([A-Z][a-zA-Z\u{00C0}-\u{00FF}]+\s+[A-Z][a-zA-Z\u{00C0}-\u{00FF}]+)\b")
            .expect("valid person regex")
    })
}

fn person_stop_list() -> &'static [&'static str] {
    &["Boletín Oficial", "Provincia Córdoba", "Ciudad Córdoba"]
}

fn detect_section_type(text: &str) -> SectionType {
    let mut best: Option<(SectionType, usize)> = None;
    for (section, patterns) in compiled_section_patterns() {
        let matches = patterns.iter().filter(|re| re.is_match(text)).count();
        if matches == 0 {
            continue;
        }
        match best {
            Some((_, best_score)) if matches <= best_score => {}
            _ => best = Some((*section, matches)),
        }
    }
    best.map(|(section, _)| section).unwrap_or(SectionType::General)
}

fn detect_amounts(text: &str) -> bool {
    amount_patterns().iter().any(|re| re.is_match(text))
}

fn detect_tables(text: &str) -> bool {
    table_patterns().iter().any(|re| re.is_match(text))
}

fn extract_entities(text: &str) -> Option<HashMap<String, Vec<String>>> {
    let mut entities: HashMap<String, Vec<String>> = HashMap::new();

    let mut amounts = Vec::new();
    for re in amount_patterns() {
        for m in re.find_iter(text) {
            if amounts.len() >= 5 {
                break;
            }
            amounts.push(m.as_str().to_string());
        }
    }
    if !amounts.is_empty() {
        amounts.truncate(5);
        entities.insert("amounts".to_string(), amounts);
    }

    let organisms: Vec<String> = organism_pattern()
        .captures_iter(text)
        .take(5)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect();
    if !organisms.is_empty() {
        entities.insert("organisms".to_string(), organisms);
    }

    let stop_list = person_stop_list();
    let persons: Vec<String> = person_pattern()
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .filter(|p| !stop_list.contains(&p.as_str()))
        .take(5)
        .collect();
    if !persons.is_empty() {
        entities.insert("persons".to_string(), persons);
    }

    if entities.is_empty() {
        None
    } else {
        Some(entities)
    }
}

/// Content-addressed fingerprint of `text`. Two chunks with byte-identical
/// text always share a hash (INV-4/P-6).
pub fn chunk_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Derive metadata for one chunk. Pure and deterministic: the same `text`
/// (and `ctx`) always yields the same `ChunkMetadata`.
pub fn enrich(text: &str, _chunk_index: usize, _document_id: &str, ctx: &EnrichContext) -> ChunkMetadata {
    ChunkMetadata {
        chunk_hash: chunk_hash(text),
        section_type: detect_section_type(text),
        language: ctx.language.clone().unwrap_or_else(|| "es".to_string()),
        has_tables: detect_tables(text),
        has_amounts: detect_amounts(text),
        entities: extract_entities(text),
        topic: ctx.topic.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_pure_function_of_text() {
        let a = chunk_hash("ARTICULO 1 texto identico");
        let b = chunk_hash("ARTICULO 1 texto identico");
        assert_eq!(a, b);
        let c = chunk_hash("ARTICULO 1 texto distinto");
        assert_ne!(a, c);
    }

    #[test]
    fn detects_decree_section() {
        let ctx = EnrichContext::default();
        let meta = enrich("DECRETO 123 dispone lo siguiente", 0, "doc-1", &ctx);
        assert_eq!(meta.section_type, SectionType::Decree);
        assert_eq!(meta.language, "es");
    }

    #[test]
    fn detects_tender_section() {
        let ctx = EnrichContext::default();
        let meta = enrich("Se llama a licitación pública para la provisión de insumos", 0, "doc-1", &ctx);
        assert_eq!(meta.section_type, SectionType::Tender);
    }

    #[test]
    fn falls_back_to_general() {
        let ctx = EnrichContext::default();
        let meta = enrich("texto sin ninguna palabra clave relevante", 0, "doc-1", &ctx);
        assert_eq!(meta.section_type, SectionType::General);
    }

    #[test]
    fn detects_amounts() {
        let ctx = EnrichContext::default();
        let meta = enrich("El subsidio otorgado es de $5000 pesos", 0, "doc-1", &ctx);
        assert!(meta.has_amounts);
    }

    #[test]
    fn detects_tables_by_tab() {
        let ctx = EnrichContext::default();
        let meta = enrich("Columna A\tColumna B\tColumna C", 0, "doc-1", &ctx);
        assert!(meta.has_tables);
    }

    #[test]
    fn topic_passes_through_unmodified() {
        let ctx = EnrichContext {
            topic: Some("presupuesto-2025".to_string()),
            language: None,
        };
        let meta = enrich("cualquier texto", 0, "doc-1", &ctx);
        assert_eq!(meta.topic.as_deref(), Some("presupuesto-2025"));
    }
}
