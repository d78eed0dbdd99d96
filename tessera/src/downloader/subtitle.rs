//! Removal of hearing-impaired cues from downloaded text subtitles.

use std::path::Path;

use media_tracks::SubtitleCodec;
use tracing::debug;

use super::error::DownloadError;

const MUSIC_NOTES: [char; 2] = ['♪', '♫'];

/// Longest prefix before a `:` still treated as a speaker label.
const MAX_SPEAKER_LABEL: usize = 32;

/// Strip sound descriptions, music cues and speaker labels from the subtitle
/// file at `path`, rewriting it in place.
///
/// Only WebVTT and SubRip are handled. Returns whether the file was rewritten.
pub async fn strip_sdh_file(path: &Path, codec: SubtitleCodec) -> Result<bool, DownloadError> {
    if !matches!(codec, SubtitleCodec::WebVtt | SubtitleCodec::SubRip) {
        debug!(path = %path.display(), codec = %codec, "Cannot strip SDH cues from this format");
        return Ok(false);
    }

    let text = tokio::fs::read_to_string(path).await?;
    let stripped = strip_sdh_cues(&text, codec == SubtitleCodec::SubRip);
    tokio::fs::write(path, stripped).await?;
    Ok(true)
}

/// Strip hearing-impaired text from every cue of a WebVTT or SubRip document.
///
/// Cues left without text are dropped. With `renumber`, numeric cue
/// identifiers are rewritten to stay sequential.
pub fn strip_sdh_cues(text: &str, renumber: bool) -> String {
    let text = text.replace("\r\n", "\n");
    let mut blocks = Vec::new();
    let mut counter = 0;

    for block in text.split("\n\n") {
        let lines: Vec<&str> = block.trim_matches('\n').lines().collect();
        if lines.iter().all(|l| l.trim().is_empty()) {
            continue;
        }
        let Some(timing) = lines.iter().position(|l| l.contains("-->")) else {
            blocks.push(lines.join("\n"));
            continue;
        };

        let kept: Vec<String> = lines[timing + 1..]
            .iter()
            .filter_map(|line| strip_line(line))
            .collect();
        if kept.is_empty() && timing + 1 < lines.len() {
            continue;
        }

        counter += 1;
        let mut cue: Vec<String> = Vec::with_capacity(timing + 1 + kept.len());
        for (i, header) in lines[..timing].iter().enumerate() {
            let numeric = header.trim().parse::<u64>().is_ok();
            if renumber && numeric && i + 1 == timing {
                cue.push(counter.to_string());
            } else {
                cue.push((*header).to_string());
            }
        }
        cue.push(lines[timing].to_string());
        cue.extend(kept);
        blocks.push(cue.join("\n"));
    }

    let mut out = blocks.join("\n\n");
    out.push('\n');
    out
}

/// One line of cue text, or `None` when nothing but hearing-impaired text was
/// on it.
fn strip_line(line: &str) -> Option<String> {
    if line.contains(MUSIC_NOTES) {
        return None;
    }

    let without_sounds = remove_enclosed(&remove_enclosed(line, '[', ']'), '(', ')');
    let mut rest = without_sounds.trim();

    let dash = rest.starts_with('-');
    if dash {
        rest = rest[1..].trim_start();
    }
    rest = strip_speaker(rest);

    let rest = rest.split_whitespace().collect::<Vec<_>>().join(" ");
    if rest.is_empty() || rest.chars().all(|c| c.is_ascii_punctuation()) {
        return None;
    }
    Some(if dash { format!("- {rest}") } else { rest })
}

/// Remove every `open ... close` span. An unclosed span is kept as is.
fn remove_enclosed(line: &str, open: char, close: char) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(start) = rest.find(open) {
        let Some(len) = rest[start..].find(close) else {
            break;
        };
        out.push_str(&rest[..start]);
        rest = &rest[start + len + close.len_utf8()..];
    }
    out.push_str(rest);
    out
}

/// Drop a leading `NAME:` label. Labels are upper case and short; times such
/// as `10:30` are left alone.
fn strip_speaker(line: &str) -> &str {
    let Some(colon) = line.find(':') else {
        return line;
    };
    let label = &line[..colon];
    let is_label = colon <= MAX_SPEAKER_LABEL
        && label.chars().any(|c| c.is_alphabetic())
        && !label.chars().any(|c| c.is_lowercase() || c.is_ascii_digit());
    if is_label {
        line[colon + 1..].trim_start()
    } else {
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sound_descriptions_and_speakers_removed() {
        assert_eq!(strip_line("[door slams]"), None);
        assert_eq!(strip_line("(sighs) Fine."), Some("Fine.".into()));
        assert_eq!(strip_line("JOHN: Over here!"), Some("Over here!".into()));
        assert_eq!(strip_line("- MARY [whispering]: Quiet."), Some("- Quiet.".into()));
        assert_eq!(strip_line("♪ Jingle bells ♪"), None);
        assert_eq!(strip_line("- (laughs)"), None);
        assert_eq!(strip_line("Meet me at 10:30."), Some("Meet me at 10:30.".into()));
        assert_eq!(strip_line("Dr. Smith: hello"), Some("Dr. Smith: hello".into()));
        assert_eq!(strip_line("[unclosed"), Some("[unclosed".into()));
    }

    #[test]
    fn test_webvtt_cues_without_dialogue_dropped() {
        let vtt = "WEBVTT\n\n\
            00:00:01.000 --> 00:00:02.000\n[thunder rumbling]\n\n\
            intro\n00:00:03.000 --> 00:00:04.000\nJOHN: Run!\n(panting)\n";
        assert_eq!(
            strip_sdh_cues(vtt, false),
            "WEBVTT\n\nintro\n00:00:03.000 --> 00:00:04.000\nRun!\n"
        );
    }

    #[test]
    fn test_subrip_renumbered() {
        let srt = "1\r\n00:00:01,000 --> 00:00:02,000\r\n♪ humming ♪\r\n\r\n\
            2\r\n00:00:03,000 --> 00:00:04,000\r\nHello.\r\n\r\n\
            3\r\n00:00:05,000 --> 00:00:06,000\r\n- [knock]\r\n- Come in.\r\n";
        assert_eq!(
            strip_sdh_cues(srt, true),
            "1\n00:00:03,000 --> 00:00:04,000\nHello.\n\n\
             2\n00:00:05,000 --> 00:00:06,000\n- Come in.\n"
        );
    }
}
