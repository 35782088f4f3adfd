//! The ordered rewrite rules of the content pipeline.
//!
//! Each rule is a pure function over the whole body. The order of [`RULES`]
//! matters: the generic tag strip must run after every rule that looks for a
//! specific tag, and quotes are cut before emphasis so their inner markup is
//! flattened rather than translated.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::directory::MentionResolver;

/// Inputs a rule may consult besides the text itself.
pub struct RuleContext<'a> {
    pub resolver: &'a dyn MentionResolver,
    pub fallback_username: &'a str,
}

/// A named rewrite step.
pub struct Rule {
    pub name: &'static str,
    rewrite: fn(&str, &RuleContext<'_>) -> String,
}

impl Rule {
    pub fn apply(&self, input: &str, ctx: &RuleContext<'_>) -> String {
        (self.rewrite)(input, ctx)
    }
}

/// All rules, in application order.
pub static RULES: [Rule; 13] = [
    Rule { name: "mentions", rewrite: mentions },
    Rule { name: "quotes", rewrite: quotes },
    Rule { name: "emoji", rewrite: emoji },
    Rule { name: "emphasis", rewrite: emphasis },
    Rule { name: "images_with_alt", rewrite: images_with_alt },
    Rule { name: "images", rewrite: images },
    Rule { name: "urls", rewrite: urls },
    Rule { name: "list_items", rewrite: list_items },
    Rule { name: "paragraphs", rewrite: paragraphs },
    Rule { name: "line_breaks", rewrite: line_breaks },
    Rule { name: "residual_tags", rewrite: residual_tags },
    Rule { name: "entities", rewrite: entities },
    Rule { name: "normalize", rewrite: normalize },
];

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("content rule pattern must compile")
}

static MENTION: Lazy<Regex> = Lazy::new(|| {
    regex(r#"(?i)<(POSTMENTION|USERMENTION)\b[^>]*\bdisplayname="([^"]+)"[^>]*>.*?</(POSTMENTION|USERMENTION)>"#)
});
static QUOTE: Lazy<Regex> = Lazy::new(|| regex(r"(?is)<QUOTE\b[^>]*>(.*?)</QUOTE>"));
static QUOTE_PARAGRAPH: Lazy<Regex> = Lazy::new(|| regex(r"(?i)</?p>"));
static QUOTE_MARKERS: Lazy<Regex> = Lazy::new(|| regex(r"(?m)^(?:&gt;|>)+\s*"));
static EMOJI: Lazy<Regex> = Lazy::new(|| regex(r"(?i)<E>(.*?)</E>"));
static ITALIC: Lazy<Regex> = Lazy::new(|| regex(r"(?i)<i>(.*?)</i>"));
static BOLD: Lazy<Regex> = Lazy::new(|| regex(r"(?i)<b>(.*?)</b>"));
static MARKUP_DELIMITERS: Lazy<Regex> = Lazy::new(|| regex(r"(?i)<(s|e)>[^<]*</(s|e)>"));
static IMAGE_WITH_ALT: Lazy<Regex> =
    Lazy::new(|| regex(r#"(?i)<IMG\s+alt="([^"]+)"\s+src="([^"]+)".*?>.*?</IMG>"#));
static IMAGE: Lazy<Regex> = Lazy::new(|| regex(r#"(?i)<IMG\b[^>]*\bsrc="([^"]+)"[^>]*>.*?</IMG>"#));
static URL: Lazy<Regex> = Lazy::new(|| regex(r#"(?i)<URL\s+url="([^"]+)"[^>]*>.*?</URL>"#));
static LIST_ITEM_PARAGRAPH: Lazy<Regex> =
    Lazy::new(|| regex(r"(?is)<LI><s>[-*+] ?</s><p>(.*?)</p></LI>"));
static LIST_ITEM: Lazy<Regex> = Lazy::new(|| regex(r"(?is)<LI><s>[-*+] ?</s>(.*?)</LI>"));
static PARAGRAPH: Lazy<Regex> = Lazy::new(|| regex(r"(?i)</?p(?:\s[^>]*)?>"));
static LINE_BREAK: Lazy<Regex> = Lazy::new(|| regex(r"(?i)</?(?:br|div)\b[^>]*>"));
static ANY_TAG: Lazy<Regex> = Lazy::new(|| regex(r"</?[A-Za-z][^>]*>"));
static CARRIAGE_RETURN: Lazy<Regex> = Lazy::new(|| regex(r"\r\n?"));
static BLANK_RUN: Lazy<Regex> = Lazy::new(|| regex(r"\n(?:[ \t]*\n){2,}"));

/// `<USERMENTION displayname="x">@x</USERMENTION>` to `@username`.
pub fn mentions(input: &str, ctx: &RuleContext<'_>) -> String {
    MENTION
        .replace_all(input, |caps: &Captures<'_>| {
            if !caps[1].eq_ignore_ascii_case(&caps[3]) {
                return caps[0].to_string();
            }
            let display_name = html_escape::decode_html_entities(&caps[2]);
            let username = ctx
                .resolver
                .resolve(&display_name)
                .unwrap_or(ctx.fallback_username);
            format!("@{}", username)
        })
        .into_owned()
}

/// `<QUOTE>` blocks to `> ` prefixed lines set off by blank lines.
pub fn quotes(input: &str, _ctx: &RuleContext<'_>) -> String {
    QUOTE
        .replace_all(input, |caps: &Captures<'_>| {
            let content = caps[1].trim();
            let cleaned = QUOTE_PARAGRAPH.replace_all(content, "");
            let cleaned = ANY_TAG.replace_all(&cleaned, "");
            let cleaned = QUOTE_MARKERS.replace_all(&cleaned, "");
            let quoted = cleaned
                .lines()
                .map(|line| format!("> {}", line.trim()).trim_end().to_string())
                .collect::<Vec<_>>()
                .join("\n");
            format!("\n\n{}\n\n", quoted)
        })
        .into_owned()
}

/// `<E>` emoji wrappers to their inner text.
pub fn emoji(input: &str, _ctx: &RuleContext<'_>) -> String {
    EMOJI.replace_all(input, "$1").into_owned()
}

/// `<i>` and `<b>` to `*x*` and `**x**`, dropping the source's own delimiters.
pub fn emphasis(input: &str, _ctx: &RuleContext<'_>) -> String {
    let italic = ITALIC.replace_all(input, |caps: &Captures<'_>| {
        format!("*{}*", MARKUP_DELIMITERS.replace_all(&caps[1], ""))
    });
    BOLD.replace_all(&italic, |caps: &Captures<'_>| {
        format!("**{}**", MARKUP_DELIMITERS.replace_all(&caps[1], ""))
    })
    .into_owned()
}

/// Images with alt text to `![alt](src)` on their own line.
pub fn images_with_alt(input: &str, _ctx: &RuleContext<'_>) -> String {
    IMAGE_WITH_ALT
        .replace_all(input, "\n![$1]($2)\n")
        .into_owned()
}

/// Remaining images to `![image](src)` on their own line.
pub fn images(input: &str, _ctx: &RuleContext<'_>) -> String {
    IMAGE.replace_all(input, "\n![image]($1)\n").into_owned()
}

/// `<URL>` links to the bare URL on its own line, for link previews.
pub fn urls(input: &str, _ctx: &RuleContext<'_>) -> String {
    URL.replace_all(input, |caps: &Captures<'_>| format!("\n{}\n", caps[1].trim()))
        .into_owned()
}

/// Both list item shapes to `- item`.
pub fn list_items(input: &str, _ctx: &RuleContext<'_>) -> String {
    let with_paragraph = LIST_ITEM_PARAGRAPH
        .replace_all(input, |caps: &Captures<'_>| format!("- {}", caps[1].trim()));
    LIST_ITEM
        .replace_all(&with_paragraph, |caps: &Captures<'_>| format!("- {}", caps[1].trim()))
        .into_owned()
}

/// `<p>` tags removed without adding breaks.
pub fn paragraphs(input: &str, _ctx: &RuleContext<'_>) -> String {
    PARAGRAPH.replace_all(input, "").into_owned()
}

/// `<br>` and `<div>` to newlines.
pub fn line_breaks(input: &str, _ctx: &RuleContext<'_>) -> String {
    LINE_BREAK.replace_all(input, "\n").into_owned()
}

/// Every other tag removed.
pub fn residual_tags(input: &str, _ctx: &RuleContext<'_>) -> String {
    ANY_TAG.replace_all(input, "").into_owned()
}

/// HTML entities decoded.
pub fn entities(input: &str, _ctx: &RuleContext<'_>) -> String {
    html_escape::decode_html_entities(input).into_owned()
}

/// LF line endings, at most one blank line in a row, trimmed.
pub fn normalize(input: &str, _ctx: &RuleContext<'_>) -> String {
    let unix = CARRIAGE_RETURN.replace_all(input, "\n");
    BLANK_RUN.replace_all(&unix, "\n\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::UserDirectory;

    fn with_ctx<T>(f: impl FnOnce(&RuleContext<'_>) -> T) -> T {
        let mut directory = UserDirectory::new();
        directory.insert("alice", Some("Alice A."));
        let ctx = RuleContext {
            resolver: &directory,
            fallback_username: "guest",
        };
        f(&ctx)
    }

    #[test]
    fn test_rule_order() {
        let names: Vec<_> = RULES.iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            [
                "mentions",
                "quotes",
                "emoji",
                "emphasis",
                "images_with_alt",
                "images",
                "urls",
                "list_items",
                "paragraphs",
                "line_breaks",
                "residual_tags",
                "entities",
                "normalize",
            ]
        );
    }

    #[test]
    fn test_mention_resolves_display_name() {
        let out = with_ctx(|ctx| {
            mentions(
                r##"hi <USERMENTION displayname="Alice A." id="3">@"Alice A."#3</USERMENTION>!"##,
                ctx,
            )
        });
        assert_eq!(out, "hi @alice!");
    }

    #[test]
    fn test_mention_unknown_falls_back_to_guest() {
        let out = with_ctx(|ctx| {
            mentions(
                r#"<POSTMENTION discussionid="4" displayname="Nobody" number="2">@Nobody</POSTMENTION>"#,
                ctx,
            )
        });
        assert_eq!(out, "@guest");
    }

    #[test]
    fn test_mention_with_mismatched_close_is_left_alone() {
        let input = r#"<USERMENTION displayname="alice">x</POSTMENTION>"#;
        let out = with_ctx(|ctx| mentions(input, ctx));
        assert_eq!(out, input);
    }

    #[test]
    fn test_quote_prefixes_each_line() {
        let out = with_ctx(|ctx| quotes("<QUOTE>line one\nline two</QUOTE>", ctx));
        assert_eq!(out, "\n\n> line one\n> line two\n\n");
    }

    #[test]
    fn test_quote_strips_inner_tags_and_markers() {
        let out = with_ctx(|ctx| {
            quotes(
                "<QUOTE><i>&gt; </i><p>quoted <b>text</b></p>\n&gt;&gt; again</QUOTE>",
                ctx,
            )
        });
        assert_eq!(out, "\n\n> quoted text\n> again\n\n");
    }

    #[test]
    fn test_emoji_keeps_inner_text() {
        assert_eq!(with_ctx(|ctx| emoji("ok <E>:smile:</E>", ctx)), "ok :smile:");
    }

    #[test]
    fn test_emphasis() {
        let out = with_ctx(|ctx| emphasis("<i>soft</i> and <b>loud</b>", ctx));
        assert_eq!(out, "*soft* and **loud**");
    }

    #[test]
    fn test_emphasis_drops_source_delimiters() {
        let out = with_ctx(|ctx| emphasis("<b><s>**</s>loud<e>**</e></b>", ctx));
        assert_eq!(out, "**loud**");
    }

    #[test]
    fn test_image_with_alt() {
        let out = with_ctx(|ctx| {
            images_with_alt(
                r#"see<IMG alt="cat" src="https://x.test/cat.png"><s>![</s>cat<e>](https://x.test/cat.png)</e></IMG>"#,
                ctx,
            )
        });
        assert_eq!(out, "see\n![cat](https://x.test/cat.png)\n");
    }

    #[test]
    fn test_image_without_alt_uses_placeholder() {
        let out = with_ctx(|ctx| {
            images(r#"<IMG src="https://x.test/a.png"><s>![](</s>x<e>)</e></IMG>"#, ctx)
        });
        assert_eq!(out, "\n![image](https://x.test/a.png)\n");
    }

    #[test]
    fn test_url_on_own_line() {
        let out = with_ctx(|ctx| {
            urls(
                r#"look <URL url="https://example.com/page"><s>[</s>here<e>](https://example.com/page)</e></URL> now"#,
                ctx,
            )
        });
        assert_eq!(out, "look \nhttps://example.com/page\n now");
    }

    #[test]
    fn test_list_items_both_shapes() {
        let out = with_ctx(|ctx| {
            list_items(
                "<LIST><LI><s>- </s><p> first </p></LI>\n<LI><s>- </s>second</LI></LIST>",
                ctx,
            )
        });
        assert_eq!(out, "<LIST>- first\n- second</LIST>");
    }

    #[test]
    fn test_paragraphs_removed_without_breaks() {
        assert_eq!(with_ctx(|ctx| paragraphs("<p>a</p><p>b</p>", ctx)), "ab");
        assert_eq!(with_ctx(|ctx| paragraphs("<pre>x</pre>", ctx)), "<pre>x</pre>");
    }

    #[test]
    fn test_line_breaks() {
        assert_eq!(with_ctx(|ctx| line_breaks("a<br/>b<div>c</div>", ctx)), "a\nb\nc\n");
        assert_eq!(with_ctx(|ctx| line_breaks("<b>x</b>", ctx)), "<b>x</b>");
    }

    #[test]
    fn test_residual_tags() {
        assert_eq!(with_ctx(|ctx| residual_tags("<t><C>code</C></t>", ctx)), "code");
    }

    #[test]
    fn test_entities() {
        assert_eq!(
            with_ctx(|ctx| entities("a &amp; b &lt;3 &quot;q&quot; &#39;s", ctx)),
            "a & b <3 \"q\" 's"
        );
    }

    #[test]
    fn test_normalize() {
        let out = with_ctx(|ctx| normalize("\r\n a\r\n\r\n\r\n\r\nb\rc \n", ctx));
        assert_eq!(out, "a\n\nb\nc");
    }

    #[test]
    fn test_generic_strip_first_destroys_quotes() {
        let input = "<QUOTE>quoted</QUOTE>";
        let in_order = with_ctx(|ctx| residual_tags(&quotes(input, ctx), ctx));
        let swapped = with_ctx(|ctx| quotes(&residual_tags(input, ctx), ctx));
        assert_eq!(in_order.trim(), "> quoted");
        assert_eq!(swapped, "quoted");
    }
}
