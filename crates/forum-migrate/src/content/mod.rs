//! Translation of Flarum's stored post XML into Markdown.
//!
//! Flarum stores post bodies as s9e TextFormatter XML (`<r>`, `<QUOTE>`,
//! `<USERMENTION>`, `<IMG>`, ...). [`ContentTransformer::transform`] runs the
//! ordered [`rules::RULES`] over a body; the transformer is pure apart from the
//! read-only user directory it consults for mentions.

mod directory;
pub mod rules;

pub use directory::{MentionResolver, UserDirectory};
pub use rules::{Rule, RuleContext, RULES};

/// Converts raw post bodies to Markdown.
pub struct ContentTransformer<'a> {
    ctx: RuleContext<'a>,
}

impl<'a> ContentTransformer<'a> {
    /// Create a transformer resolving mentions through `resolver`, using
    /// `fallback_username` for names it does not know.
    pub fn new(resolver: &'a dyn MentionResolver, fallback_username: &'a str) -> Self {
        Self {
            ctx: RuleContext {
                resolver,
                fallback_username,
            },
        }
    }

    /// Transform a raw body. Absent or blank input gives an empty string.
    pub fn transform(&self, raw: Option<&str>) -> String {
        let raw = match raw {
            Some(raw) if !raw.trim().is_empty() => raw,
            _ => return String::new(),
        };

        RULES
            .iter()
            .fold(raw.to_string(), |text, rule| rule.apply(&text, &self.ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> UserDirectory {
        let mut directory = UserDirectory::new();
        directory.insert("toby", Some("Toby"));
        directory
    }

    #[test]
    fn test_empty_input() {
        let directory = directory();
        let transformer = ContentTransformer::new(&directory, "guest");
        assert_eq!(transformer.transform(None), "");
        assert_eq!(transformer.transform(Some("")), "");
        assert_eq!(transformer.transform(Some("  \n ")), "");
    }

    #[test]
    fn test_quote_example() {
        let directory = directory();
        let transformer = ContentTransformer::new(&directory, "guest");
        assert_eq!(
            transformer.transform(Some("<QUOTE>line one\nline two</QUOTE>")),
            "> line one\n> line two"
        );
    }

    #[test]
    fn test_quote_is_separated_from_text() {
        let directory = directory();
        let transformer = ContentTransformer::new(&directory, "guest");
        assert_eq!(
            transformer.transform(Some("<r>before<QUOTE><p>said</p></QUOTE>after</r>")),
            "before\n\n> said\n\nafter"
        );
    }

    #[test]
    fn test_deterministic() {
        let directory = directory();
        let transformer = ContentTransformer::new(&directory, "guest");
        let input = r#"<r><p>Hi <USERMENTION displayname="Toby" id="2">@Toby</USERMENTION> &amp; all</p></r>"#;
        assert_eq!(transformer.transform(Some(input)), transformer.transform(Some(input)));
    }

    #[test]
    fn test_unknown_mention_uses_fallback() {
        let directory = directory();
        let transformer = ContentTransformer::new(&directory, "guest");
        let out = transformer.transform(Some(
            r#"<r><USERMENTION displayname="Ghost" id="99">@Ghost</USERMENTION> hello</r>"#,
        ));
        assert_eq!(out, "@guest hello");
    }

    #[test]
    fn test_full_post() {
        let directory = directory();
        let transformer = ContentTransformer::new(&directory, "guest");
        let input = concat!(
            r#"<r><POSTMENTION discussionid="7" displayname="Toby" id="31" number="2">@Toby#31</POSTMENTION> "#,
            r#"<QUOTE><p>old &gt; new</p></QUOTE>"#,
            r#"<p>I <i>really</i> agree <E>:+1:</E><br/>"#,
            r#"Details: <URL url="https://example.com/a?b=1&amp;c=2">link</URL></p>"#,
            r#"<LIST><LI><s>- </s><p>one</p></LI><LI><s>- </s>two</LI></LIST>"#,
            r#"<IMG alt="chart" src="https://img.test/c.png">chart</IMG></r>"#,
        );
        let expected = concat!(
            "@toby \n\n> old > new\n\n",
            "I *really* agree :+1:\n",
            "Details: \nhttps://example.com/a?b=1&c=2\n",
            "- one- two\n",
            "![chart](https://img.test/c.png)",
        );
        assert_eq!(transformer.transform(Some(input)), expected);
    }
}
