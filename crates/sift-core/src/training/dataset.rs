//! Training data: the JSONL feedback log, the seed CSV and their merge.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{SiftError, SiftResult};
use crate::traits::TriageStore;
use crate::types::{PriorityLabel, TrainingSample};

/// Counts from loading a dataset.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DatasetStats {
    /// Non-empty lines seen.
    pub total: u64,
    pub loaded: u64,
    pub skipped: u64,
}

impl DatasetStats {
    fn absorb(&mut self, other: &DatasetStats) {
        self.total += other.total;
        self.loaded += other.loaded;
        self.skipped += other.skipped;
    }
}

/// Merged training samples with a content signature.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub samples: Vec<TrainingSample>,
    pub stats: DatasetStats,
    pub signature: String,
}

impl Dataset {
    /// Merge the feedback log with an optional seed CSV. Missing files count as empty.
    pub async fn load(feedback_log: &Path, seed_csv: Option<&Path>) -> SiftResult<Self> {
        let mut samples = Vec::new();
        let mut stats = DatasetStats::default();

        if let Some(seed) = seed_csv {
            let (seeded, seed_stats) = read_seed_csv(seed).await?;
            samples.extend(seeded);
            stats.absorb(&seed_stats);
        }
        let (feedback, feedback_stats) = read_feedback_log(feedback_log).await?;
        samples.extend(feedback);
        stats.absorb(&feedback_stats);

        let signature = signature(&samples);
        info!(
            samples = samples.len(),
            skipped = stats.skipped,
            signature = %signature,
            "Loaded training dataset"
        );
        Ok(Self {
            samples,
            stats,
            signature,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// MD5 over every sample in order, as `label \t text \n`.
pub fn signature(samples: &[TrainingSample]) -> String {
    let mut ctx = md5::Context::new();
    for sample in samples {
        ctx.consume(sample.label.to_string().as_bytes());
        ctx.consume(b"\t");
        ctx.consume(sample.text.as_bytes());
        ctx.consume(b"\n");
    }
    format!("{:x}", ctx.compute())
}

/// Read `{"text": .., "label_priority": ..}` lines, skipping malformed ones.
pub async fn read_feedback_log(path: &Path) -> SiftResult<(Vec<TrainingSample>, DatasetStats)> {
    let Some(file) = open_optional(path).await? else {
        debug!(path = %path.display(), "No feedback log yet");
        return Ok((Vec::new(), DatasetStats::default()));
    };

    let mut samples = Vec::new();
    let mut stats = DatasetStats::default();
    let mut lines = BufReader::new(file).lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        stats.total += 1;
        match serde_json::from_str::<TrainingSample>(line) {
            Ok(sample) if !sample.text.trim().is_empty() => {
                samples.push(sample);
                stats.loaded += 1;
            }
            Ok(_) => skip(&mut stats, SiftError::corrupt_dataset(line_no, "empty text")),
            Err(e) => skip(&mut stats, SiftError::corrupt_dataset(line_no, e.to_string())),
        }
    }
    Ok((samples, stats))
}

/// Read `text,label` rows. A header row and quoted text fields are accepted.
pub async fn read_seed_csv(path: &Path) -> SiftResult<(Vec<TrainingSample>, DatasetStats)> {
    let Some(file) = open_optional(path).await? else {
        warn!(path = %path.display(), "Seed dataset not found");
        return Ok((Vec::new(), DatasetStats::default()));
    };

    let mut samples = Vec::new();
    let mut stats = DatasetStats::default();
    let mut lines = BufReader::new(file).lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line_no == 1 && line.eq_ignore_ascii_case("text,label") {
            continue;
        }
        stats.total += 1;
        match parse_csv_row(line) {
            Some((text, label)) => match PriorityLabel::from_label(&label) {
                Some(label) => {
                    samples.push(TrainingSample::new(text, label));
                    stats.loaded += 1;
                }
                None => skip(&mut stats, SiftError::unknown_label(line_no, &label)),
            },
            None => skip(&mut stats, SiftError::corrupt_dataset(line_no, "expected text,label")),
        }
    }
    Ok((samples, stats))
}

fn skip(stats: &mut DatasetStats, err: SiftError) {
    warn!(error = %err, code = %err.code(), "Skipping training row");
    stats.skipped += 1;
}

async fn open_optional(path: &Path) -> SiftResult<Option<File>> {
    match File::open(path).await {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Split a `text,label` row. The label is the last field; the text may be
/// double-quoted with `""` escapes.
fn parse_csv_row(line: &str) -> Option<(String, String)> {
    let (text, label) = if let Some(rest) = line.strip_prefix('"') {
        let mut text = String::new();
        let mut chars = rest.char_indices().peekable();
        let mut end = None;
        while let Some((i, c)) = chars.next() {
            if c == '"' {
                if matches!(chars.peek(), Some((_, '"'))) {
                    text.push('"');
                    chars.next();
                } else {
                    end = Some(i + 1);
                    break;
                }
            } else {
                text.push(c);
            }
        }
        let label = rest[end?..].trim_start().strip_prefix(',')?;
        (text, label.to_string())
    } else {
        let (text, label) = line.rsplit_once(',')?;
        (text.to_string(), label.to_string())
    };

    let label = label.trim().trim_matches('"').to_string();
    if text.trim().is_empty() || label.is_empty() {
        return None;
    }
    Some((text.trim().to_string(), label))
}

/// Append-only JSONL feedback log.
pub struct FeedbackLog {
    path: PathBuf,
    write: Mutex<()>,
}

impl FeedbackLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, sample: &TrainingSample) -> SiftResult<()> {
        let mut line = serde_json::to_string(sample)?;
        line.push('\n');

        let _guard = self.write.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Records user corrections as training feedback.
pub struct DatasetLogger {
    store: Arc<dyn TriageStore>,
    log: FeedbackLog,
}

impl DatasetLogger {
    pub fn new(store: Arc<dyn TriageStore>, log: FeedbackLog) -> Self {
        Self { store, log }
    }

    /// Store the user's label for a message and append it as a sample.
    ///
    /// The inferred label on the stored message is left as it was.
    pub async fn record_correction(&self, message_id: &str, label: PriorityLabel) -> SiftResult<()> {
        let stored = self
            .store
            .get_message(message_id)
            .await?
            .ok_or_else(|| SiftError::not_found(message_id))?;

        let text = stored.message.text();
        if text.is_empty() {
            return Err(SiftError::validation(format!("message {message_id} has no text")));
        }

        self.store.set_user_priority(message_id, label).await?;
        self.store.append_training_sample(&text, label).await?;
        self.log.append(&TrainingSample::new(text, label)).await?;
        info!(message_id, inferred = %stored.priority, corrected = %label, "Recorded priority correction");
        Ok(())
    }
}
