//! SSML documents for synthesis requests.

/// Wrap `text` in a `<speak>` document spoken by `voice`.
///
/// The document language stays `en-US`; the voice itself decides the spoken
/// language. Both values are XML-escaped.
pub fn build(voice: &str, text: &str) -> String {
    format!(
        r#"<speak version="1.0" xmlns="https://www.w3.org/2001/10/synthesis" xml:lang="en-US"><voice name="{}">{}</voice></speak>"#,
        escape(voice),
        escape(text),
    )
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_wraps_text_in_voice() {
        let doc = build("it-IT-ElsaNeural", "Ciao");
        assert_eq!(
            doc,
            r#"<speak version="1.0" xmlns="https://www.w3.org/2001/10/synthesis" xml:lang="en-US"><voice name="it-IT-ElsaNeural">Ciao</voice></speak>"#
        );
    }

    #[test]
    fn test_text_and_voice_are_escaped() {
        let doc = build(r#"x" onload="y"#, r#"R&D <rocks> "a lot" isn't it"#);
        assert!(doc.contains("R&amp;D &lt;rocks&gt; &quot;a lot&quot; isn&apos;t it"));
        assert!(doc.contains(r#"<voice name="x&quot; onload=&quot;y">"#));
        assert!(!doc.contains("<rocks>"));
    }
}
