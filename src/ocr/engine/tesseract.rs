use anyhow::{Context, Result, anyhow};
use std::collections::HashMap;
use std::process::Command;

use super::RawDetection;

pub(super) fn run_tesseract_tsv(path: &std::path::Path, languages: &str) -> Result<String> {
    let output = Command::new("tesseract")
        .arg(path)
        .arg("stdout")
        .arg("-l")
        .arg(languages)
        .arg("--oem")
        .arg("1")
        .arg("--psm")
        .arg("6")
        .arg("--dpi")
        .arg("300")
        .arg("tsv")
        .output()
        .with_context(|| "failed to run tesseract (is it installed?)")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("tesseract failed: {}", stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[derive(Clone)]
struct WordToken {
    text: String,
    left: u32,
    top: u32,
    width: u32,
    height: u32,
    conf: f32,
}

/// Groups level-5 word rows by (page, block, paragraph, line) into one
/// detection per text line. Line confidence is the weakest word confidence,
/// scaled to 0..1.
pub(crate) fn parse_tsv_detections(tsv: &str) -> Result<Vec<RawDetection>> {
    let mut word_map: HashMap<(i32, i32, i32, i32), Vec<WordToken>> = HashMap::new();

    for (idx, row) in tsv.lines().enumerate() {
        if idx == 0 {
            continue;
        }
        let cols = row.split('\t').collect::<Vec<_>>();
        if cols.len() < 12 {
            continue;
        }
        let level: i32 = cols[0].parse().unwrap_or(0);
        if level != 5 {
            continue;
        }
        let page_num: i32 = cols[1].parse().unwrap_or(0);
        let block_num: i32 = cols[2].parse().unwrap_or(0);
        let par_num: i32 = cols[3].parse().unwrap_or(0);
        let line_num: i32 = cols[4].parse().unwrap_or(0);
        let left: u32 = cols[6].parse().unwrap_or(0);
        let top: u32 = cols[7].parse().unwrap_or(0);
        let width: u32 = cols[8].parse().unwrap_or(0);
        let height: u32 = cols[9].parse().unwrap_or(0);
        let conf: f32 = cols[10].parse().unwrap_or(-1.0);
        let text = cols[11].trim();
        if text.is_empty() || conf < 0.0 {
            continue;
        }

        let key = (page_num, block_num, par_num, line_num);
        word_map.entry(key).or_default().push(WordToken {
            text: text.to_string(),
            left,
            top,
            width,
            height,
            conf,
        });
    }

    let mut keyed = word_map.into_iter().collect::<Vec<_>>();
    keyed.sort_by_key(|(key, _)| *key);

    let mut detections = Vec::new();
    for (_, mut words) in keyed {
        words.sort_by_key(|word| word.left);
        if let Some(detection) = build_detection(&words) {
            detections.push(detection);
        }
    }
    Ok(detections)
}

fn build_detection(words: &[WordToken]) -> Option<RawDetection> {
    let first = words.first()?;
    let mut x1 = first.left;
    let mut y1 = first.top;
    let mut x2 = first.left + first.width;
    let mut y2 = first.top + first.height;
    let mut conf = first.conf;
    let mut text = String::new();

    for word in words {
        x1 = x1.min(word.left);
        y1 = y1.min(word.top);
        x2 = x2.max(word.left + word.width);
        y2 = y2.max(word.top + word.height);
        conf = conf.min(word.conf);
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(&word.text);
    }

    let (x1, y1, x2, y2) = (x1 as f32, y1 as f32, x2 as f32, y2 as f32);
    Some(RawDetection {
        corners: [(x1, y1), (x2, y1), (x2, y2), (x1, y2)],
        text,
        confidence: (conf / 100.0).clamp(0.0, 1.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    #[test]
    fn single_line_groups_words() {
        let tsv = format!(
            "{HEADER}\n\
             5\t1\t1\t1\t1\t1\t10\t20\t40\t18\t96.1\tBIG\n\
             5\t1\t1\t1\t1\t2\t55\t21\t60\t17\t91.5\tSALE\n"
        );
        let detections = parse_tsv_detections(&tsv).expect("parse");
        assert_eq!(detections.len(), 1);
        let detection = &detections[0];
        assert_eq!(detection.text, "BIG SALE");
        assert_eq!(super::super::bounds_from_corners(&detection.corners), (10, 20, 115, 39));
        assert!((detection.confidence - 0.915).abs() < 1e-4);
    }

    #[test]
    fn separate_lines_stay_separate() {
        let tsv = format!(
            "{HEADER}\n\
             5\t1\t1\t1\t1\t1\t10\t20\t40\t18\t96.0\tfirst\n\
             5\t1\t1\t1\t2\t1\t10\t50\t44\t18\t88.0\tsecond\n"
        );
        let detections = parse_tsv_detections(&tsv).expect("parse");
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].text, "first");
        assert_eq!(detections[1].text, "second");
    }

    #[test]
    fn malformed_and_unconfident_rows_are_skipped() {
        let tsv = format!(
            "{HEADER}\n\
             not-a-row\n\
             4\t1\t1\t1\t1\t0\t0\t0\t100\t30\t-1\t\n\
             5\t1\t1\t1\t1\t1\t10\t20\t40\t18\t-1\tghost\n"
        );
        let detections = parse_tsv_detections(&tsv).expect("parse");
        assert!(detections.is_empty());
    }
}
