//! Namespace-aware parsing of the arXiv ATOM feed.
//!
//! Two namespaces matter: generic Atom and the arXiv extension. A single
//! unparseable entry is logged and skipped; an ill-formed document aborts
//! the whole call.

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;

use crate::error::RelayError;
use crate::models::{PaperMetadata, PaperSource};

const ATOM_NS: &[u8] = b"http://www.w3.org/2005/Atom";
const ARXIV_NS: &[u8] = b"http://arxiv.org/schemas/atom";

/// Which text-bearing element we are currently inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Id,
    Title,
    Summary,
    Published,
    Updated,
    AuthorName,
    Doi,
    JournalRef,
    Comment,
}

impl Field {
    fn tag(self) -> &'static [u8] {
        match self {
            Field::Id => b"id",
            Field::Title => b"title",
            Field::Summary => b"summary",
            Field::Published => b"published",
            Field::Updated => b"updated",
            Field::AuthorName => b"name",
            Field::Doi => b"doi",
            Field::JournalRef => b"journal_ref",
            Field::Comment => b"comment",
        }
    }
}

#[derive(Debug, Default)]
struct EntryDraft {
    id_raw: String,
    title: String,
    summary: String,
    authors: Vec<String>,
    categories: Vec<String>,
    published: String,
    updated: String,
    pdf_url: String,
    arxiv_url: String,
    doi: Option<String>,
    journal_ref: Option<String>,
    comments: Option<String>,
}

/// Parse a feed document into paper metadata, stamping `source_query` on
/// every entry.
pub fn parse_feed(xml: &str, source_query: &str) -> Result<Vec<PaperMetadata>, RelayError> {
    let mut reader = NsReader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut papers = Vec::new();
    let mut in_entry = false;
    let mut in_author = false;
    let mut draft = EntryDraft::default();
    let mut field: Option<Field> = None;
    let mut text = String::new();

    loop {
        let (resolve, event) = reader
            .read_resolved_event()
            .map_err(|e| RelayError::Parse(format!("malformed feed: {}", e)))?;

        match event {
            Event::Start(ref e) => {
                let local = e.local_name();
                match ns_of(&resolve) {
                    Some(Ns::Atom) => match local.as_ref() {
                        b"entry" => {
                            in_entry = true;
                            draft = EntryDraft::default();
                        }
                        b"author" if in_entry => in_author = true,
                        b"name" if in_entry && in_author => field = Some(Field::AuthorName),
                        b"id" if in_entry => field = Some(Field::Id),
                        b"title" if in_entry => field = Some(Field::Title),
                        b"summary" if in_entry => field = Some(Field::Summary),
                        b"published" if in_entry => field = Some(Field::Published),
                        b"updated" if in_entry => field = Some(Field::Updated),
                        b"category" if in_entry => read_category(e, &mut draft)?,
                        b"link" if in_entry => read_link(e, &mut draft)?,
                        _ => {}
                    },
                    Some(Ns::Arxiv) if in_entry => match local.as_ref() {
                        b"doi" => field = Some(Field::Doi),
                        b"journal_ref" => field = Some(Field::JournalRef),
                        b"comment" => field = Some(Field::Comment),
                        _ => {}
                    },
                    _ => {}
                }
            }
            Event::Empty(ref e) => {
                if in_entry && matches!(ns_of(&resolve), Some(Ns::Atom)) {
                    match e.local_name().as_ref() {
                        b"category" => read_category(e, &mut draft)?,
                        b"link" => read_link(e, &mut draft)?,
                        _ => {}
                    }
                }
            }
            Event::Text(t) => {
                if field.is_some() {
                    let decoded = t
                        .unescape()
                        .map_err(|e| RelayError::Parse(format!("text: {}", e)))?;
                    text.push_str(&decoded);
                }
            }
            Event::CData(t) => {
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Event::End(ref e) => {
                let local = e.local_name();
                if let Some(current) = field {
                    if local.as_ref() == current.tag() {
                        commit_field(current, std::mem::take(&mut text), &mut draft);
                        field = None;
                    }
                } else {
                    match local.as_ref() {
                        b"author" => in_author = false,
                        b"entry" if in_entry => {
                            in_entry = false;
                            match finish_entry(std::mem::take(&mut draft), source_query) {
                                Some(paper) => papers.push(paper),
                                None => {
                                    tracing::warn!("Failed to parse feed entry, skipping");
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(papers)
}

enum Ns {
    Atom,
    Arxiv,
}

fn ns_of(resolve: &ResolveResult) -> Option<Ns> {
    match resolve {
        ResolveResult::Bound(Namespace(ns)) if *ns == ATOM_NS => Some(Ns::Atom),
        ResolveResult::Bound(Namespace(ns)) if *ns == ARXIV_NS => Some(Ns::Arxiv),
        _ => None,
    }
}

fn read_category(e: &BytesStart<'_>, draft: &mut EntryDraft) -> Result<(), RelayError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| RelayError::Parse(format!("attribute: {}", e)))?;
        if attr.key.local_name().as_ref() == b"term" {
            let term = attr
                .unescape_value()
                .map_err(|e| RelayError::Parse(format!("attribute: {}", e)))?;
            if !term.is_empty() {
                draft.categories.push(term.into_owned());
            }
        }
    }
    Ok(())
}

fn read_link(e: &BytesStart<'_>, draft: &mut EntryDraft) -> Result<(), RelayError> {
    let mut rel = String::new();
    let mut href = String::new();
    let mut title = String::new();

    for attr in e.attributes() {
        let attr = attr.map_err(|e| RelayError::Parse(format!("attribute: {}", e)))?;
        let value = attr
            .unescape_value()
            .map_err(|e| RelayError::Parse(format!("attribute: {}", e)))?;
        match attr.key.local_name().as_ref() {
            b"rel" => rel = value.into_owned(),
            b"href" => href = value.into_owned(),
            b"title" => title = value.into_owned(),
            _ => {}
        }
    }

    if rel == "alternate" {
        draft.arxiv_url = href;
    } else if title == "pdf" || href.ends_with(".pdf") {
        draft.pdf_url = href;
    }
    Ok(())
}

fn commit_field(field: Field, text: String, draft: &mut EntryDraft) {
    match field {
        Field::Id => draft.id_raw = text.trim().to_string(),
        // arXiv titles and abstracts carry embedded newlines
        Field::Title => draft.title = collapse_whitespace(&text),
        Field::Summary => draft.summary = collapse_whitespace(&text),
        Field::Published => draft.published = text.trim().to_string(),
        Field::Updated => draft.updated = text.trim().to_string(),
        Field::AuthorName => {
            let name = text.trim().to_string();
            if !name.is_empty() {
                draft.authors.push(name);
            }
        }
        Field::Doi => draft.doi = non_empty(text),
        Field::JournalRef => draft.journal_ref = non_empty(text),
        Field::Comment => draft.comments = non_empty(text),
    }
}

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Entry id has the form `http://arxiv.org/abs/2401.12345v1`.
fn split_id(id_raw: &str) -> Option<(String, String)> {
    let rest = id_raw.split("arxiv.org/abs/").nth(1)?;
    match rest.split_once('v') {
        Some((id, version)) if !id.is_empty() && !version.is_empty() => {
            Some((id.to_string(), format!("v{}", version)))
        }
        _ if !rest.is_empty() => Some((rest.to_string(), "v1".to_string())),
        _ => None,
    }
}

/// Categories plus their top-level prefixes, first-appearance order.
fn derive_subcategories(categories: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for cat in categories {
        if seen.insert(cat.clone()) {
            out.push(cat.clone());
        }
    }
    for cat in categories {
        if let Some((prefix, _)) = cat.split_once('.') {
            if seen.insert(prefix.to_string()) {
                out.push(prefix.to_string());
            }
        }
    }
    out
}

fn finish_entry(draft: EntryDraft, source_query: &str) -> Option<PaperMetadata> {
    let (paper_id, version) = split_id(&draft.id_raw)?;

    Some(PaperMetadata {
        paper_id,
        version,
        title: draft.title,
        r#abstract: draft.summary,
        authors: draft.authors,
        subcategories: derive_subcategories(&draft.categories),
        categories: draft.categories,
        submitted_date: date_prefix(&draft.published),
        updated_date: non_empty(date_prefix(&draft.updated)),
        doi: draft.doi,
        journal_ref: draft.journal_ref,
        comments: draft.comments,
        pdf_url: draft.pdf_url,
        arxiv_url: draft.arxiv_url,
        source: PaperSource::Query,
        source_query: source_query.to_string(),
        relevance_score: None,
    })
}

/// `2024-01-20T18:30:04Z` -> `2024-01-20`
fn date_prefix(timestamp: &str) -> String {
    timestamp.chars().take(10).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title>ArXiv Query Results</title>
  <entry>
    <id>http://arxiv.org/abs/2401.12345v2</id>
    <title>Transformers for
        Time Series</title>
    <summary>  We study
      attention over temporal data.
    </summary>
    <published>2024-01-20T18:30:04Z</published>
    <updated>2024-02-01T09:00:00Z</updated>
    <author><name>Ada Lovelace</name></author>
    <author><name>Alan Turing</name></author>
    <category term="cs.LG" scheme="http://arxiv.org/schemas/atom"/>
    <category term="stat.ML" scheme="http://arxiv.org/schemas/atom"/>
    <link href="http://arxiv.org/abs/2401.12345v2" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/2401.12345v2" rel="related" type="application/pdf"/>
    <arxiv:doi>10.1234/example</arxiv:doi>
    <arxiv:journal_ref>Journal of Examples 12 (2024)</arxiv:journal_ref>
    <arxiv:comment>15 pages, 3 figures</arxiv:comment>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2402.00001</id>
    <title>A Second Paper</title>
    <summary>Another abstract.</summary>
    <published>2024-02-02T00:00:00Z</published>
    <author><name>Grace Hopper</name></author>
    <category term="q-fin.TR"/>
    <link href="http://arxiv.org/abs/2402.00001" rel="alternate"/>
    <link href="http://arxiv.org/pdf/2402.00001.pdf" rel="related"/>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_full_entry() {
        let papers = parse_feed(FEED, "transformer time series").unwrap();
        assert_eq!(papers.len(), 2);

        let paper = &papers[0];
        assert_eq!(paper.paper_id, "2401.12345");
        assert_eq!(paper.version, "v2");
        assert_eq!(paper.title, "Transformers for Time Series");
        assert_eq!(paper.r#abstract, "We study attention over temporal data.");
        assert_eq!(paper.authors, vec!["Ada Lovelace", "Alan Turing"]);
        assert_eq!(paper.categories, vec!["cs.LG", "stat.ML"]);
        assert_eq!(paper.subcategories, vec!["cs.LG", "stat.ML", "cs", "stat"]);
        assert_eq!(paper.submitted_date, "2024-01-20");
        assert_eq!(paper.updated_date.as_deref(), Some("2024-02-01"));
        assert_eq!(paper.doi.as_deref(), Some("10.1234/example"));
        assert_eq!(paper.journal_ref.as_deref(), Some("Journal of Examples 12 (2024)"));
        assert_eq!(paper.comments.as_deref(), Some("15 pages, 3 figures"));
        assert_eq!(paper.arxiv_url, "http://arxiv.org/abs/2401.12345v2");
        assert_eq!(paper.pdf_url, "http://arxiv.org/pdf/2401.12345v2");
        assert_eq!(paper.source_query, "transformer time series");
    }

    #[test]
    fn test_unversioned_id_defaults_to_v1() {
        let papers = parse_feed(FEED, "q").unwrap();
        let paper = &papers[1];
        assert_eq!(paper.paper_id, "2402.00001");
        assert_eq!(paper.version, "v1");
        // pdf resolved by the .pdf suffix, no title attribute
        assert_eq!(paper.pdf_url, "http://arxiv.org/pdf/2402.00001.pdf");
        assert_eq!(paper.updated_date, None);
    }

    #[test]
    fn test_bad_entry_is_skipped() {
        let feed = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/abs/2401.00001v1</id>
    <title>One</title>
  </entry>
  <entry>
    <title>No id at all</title>
    <summary>This entry is missing its id element.</summary>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2401.00003v1</id>
    <title>Three</title>
  </entry>
</feed>"#;

        let papers = parse_feed(feed, "q").unwrap();
        assert_eq!(papers.len(), 2);
        assert_eq!(papers[0].paper_id, "2401.00001");
        assert_eq!(papers[1].paper_id, "2401.00003");
    }

    #[test]
    fn test_five_entries_one_bad() {
        let mut entries = String::new();
        for i in 1..=5 {
            if i == 3 {
                entries.push_str("<entry><title>missing id</title></entry>");
            } else {
                entries.push_str(&format!(
                    "<entry><id>http://arxiv.org/abs/2401.0000{i}v1</id><title>P{i}</title></entry>"
                ));
            }
        }
        let feed = format!(
            r#"<?xml version="1.0"?><feed xmlns="http://www.w3.org/2005/Atom">{entries}</feed>"#
        );

        let papers = parse_feed(&feed, "q").unwrap();
        assert_eq!(papers.len(), 4);
    }

    #[test]
    fn test_malformed_document_aborts() {
        let result = parse_feed("<feed><entry><id>unclosed", "q");
        assert!(matches!(result, Err(RelayError::Parse(_))));
    }

    #[test]
    fn test_id_outside_arxiv_namespace_is_skipped() {
        let feed = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://example.org/abs/xyz</id>
    <title>Not an arXiv id</title>
  </entry>
</feed>"#;
        let papers = parse_feed(feed, "q").unwrap();
        assert!(papers.is_empty());
    }

    #[test]
    fn test_split_id() {
        assert_eq!(
            split_id("http://arxiv.org/abs/2401.12345v3"),
            Some(("2401.12345".to_string(), "v3".to_string()))
        );
        assert_eq!(
            split_id("http://arxiv.org/abs/2401.12345"),
            Some(("2401.12345".to_string(), "v1".to_string()))
        );
        assert_eq!(split_id("http://example.org/nothing"), None);
    }

    #[test]
    fn test_derive_subcategories_order_and_dedup() {
        let cats = vec![
            "cs.LG".to_string(),
            "cs.AI".to_string(),
            "stat.ML".to_string(),
            "cs.LG".to_string(),
        ];
        assert_eq!(
            derive_subcategories(&cats),
            vec!["cs.LG", "cs.AI", "stat.ML", "cs", "stat"]
        );
    }
}
