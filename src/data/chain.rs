//! Rolling iteration over the same table in many files.
//!
//! A [`TableChain`] opens one file at a time, binds the shared
//! [`RowBuffer`] to the table found there and hands out rows that pass its
//! [`FilterPipeline`]. Unreadable files, files without the table and tables
//! without columns are skipped with a warning.
//!
//! File names come from a [`FileFeed`]: a fixed [`FileList`] or a
//! [`FileQueue`] fed through a channel by another thread.

use std::path::Path;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ChainOptions;
use crate::data::filter::{Filter, FilterPipeline};
use crate::data::row_buffer::RowBuffer;
use crate::data::table::{BindOptions, Table};
use crate::error::{Result, TreeError};
use crate::source::{expand_path, OpenMode, SourceFile, SourceObject, StorageEngine};
use crate::utils::format::{format_rate, humanize_bytes};

/// Source of file names for a chain
pub trait FileFeed {
    /// Next file name, or `None` once the feed is drained
    fn next_file(&mut self) -> Option<String>;

    /// Start again from the first file
    fn rewind(&mut self);

    /// Number of files still to come
    fn len(&mut self) -> usize;

    fn is_empty(&mut self) -> bool {
        self.len() == 0
    }
}

/// A fixed list of files
#[derive(Debug, Clone)]
pub struct FileList {
    files: Vec<String>,
    current: usize,
}

impl FileList {
    pub fn new(files: Vec<String>) -> Self {
        Self { files, current: 0 }
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }
}

impl FileFeed for FileList {
    fn next_file(&mut self) -> Option<String> {
        let file = self.files.get(self.current)?.clone();
        let remaining = self.files.len() - self.current;
        info!(
            target: "chain",
            "{} file{} remaining",
            remaining,
            if remaining > 1 { "s" } else { "" }
        );
        self.current += 1;
        Some(file)
    }

    fn rewind(&mut self) {
        self.current = 0;
    }

    /// Total number of files in the list
    fn len(&mut self) -> usize {
        self.files.len()
    }
}

/// Files received over a channel. `None` marks the end of the feed.
///
/// Files already received are remembered, so a rewound queue replays them
/// before waiting for new ones. `len` and `is_empty` only see what the
/// producer has sent so far and are not reliable while it is running.
pub struct FileQueue {
    receiver: Receiver<Option<String>>,
    seen: Vec<String>,
    current: usize,
    finished: bool,
}

impl FileQueue {
    pub fn new(receiver: Receiver<Option<String>>) -> Self {
        Self {
            receiver,
            seen: Vec::new(),
            current: 0,
            finished: false,
        }
    }

    /// Files received so far
    pub fn seen(&self) -> &[String] {
        &self.seen
    }

    fn drain_pending(&mut self) {
        while !self.finished {
            match self.receiver.try_recv() {
                Ok(Some(file)) => self.seen.push(file),
                Ok(None) | Err(TryRecvError::Disconnected) => self.finished = true,
                Err(TryRecvError::Empty) => break,
            }
        }
    }
}

impl FileFeed for FileQueue {
    fn next_file(&mut self) -> Option<String> {
        if self.current >= self.seen.len() {
            if self.finished {
                return None;
            }
            // blocks until the producer sends a file or the sentinel
            match self.receiver.recv() {
                Ok(Some(file)) => self.seen.push(file),
                Ok(None) | Err(_) => {
                    self.finished = true;
                    return None;
                }
            }
        }
        let file = self.seen[self.current].clone();
        self.current += 1;
        Some(file)
    }

    fn rewind(&mut self) {
        self.current = 0;
    }

    fn len(&mut self) -> usize {
        warn!(target: "chain", "len() of `TableQueue` instance is not reliable");
        self.drain_pending();
        self.seen.len() - self.current
    }

    fn is_empty(&mut self) -> bool {
        warn!(target: "chain", "is_empty() of `TableQueue` instance is not reliable");
        self.drain_pending();
        self.current >= self.seen.len()
    }
}

/// Lifecycle of the chain's current file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    /// No file open
    Closed,
    /// A file and its table are bound
    Open,
    /// The feed is drained
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    NotStarted,
    Running,
    Done,
}

/// Counters for the current pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainStats {
    pub files_opened: u64,
    pub files_skipped: u64,
    /// Rows read from tables, accepted or not
    pub rows_read: u64,
    /// Rows accepted by the filters
    pub rows_passed: u64,
}

/// Passed to file-change observers after each rollover
pub struct FileChange<'a> {
    pub name: &'a str,
    pub path: &'a str,
    pub table: &'a mut Table,
}

pub type FileObserver = Box<dyn FnMut(FileChange<'_>)>;

struct FileProgress {
    entries: u64,
    total: u64,
    started: Instant,
    last_report: Instant,
}

/// Configures and opens a [`TableChain`]
pub struct ChainBuilder {
    name: String,
    engine: Box<dyn StorageEngine>,
    options: ChainOptions,
    buffer: Option<RowBuffer>,
    filters: FilterPipeline,
    observers: Vec<FileObserver>,
}

impl ChainBuilder {
    pub fn new(name: impl Into<String>, engine: impl StorageEngine + 'static) -> Self {
        Self {
            name: name.into(),
            engine: Box::new(engine),
            options: ChainOptions::default(),
            buffer: None,
            filters: FilterPipeline::new(),
            observers: Vec::new(),
        }
    }

    pub fn options(mut self, options: ChainOptions) -> Self {
        self.options = options;
        self
    }

    /// Reuse an existing buffer instead of building one from the first table
    pub fn buffer(mut self, buffer: RowBuffer) -> Self {
        self.buffer = Some(buffer);
        self
    }

    pub fn filters(mut self, filters: FilterPipeline) -> Self {
        self.filters = filters;
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Call `observer` each time a new table is bound
    pub fn on_file_change(mut self, observer: impl FnMut(FileChange<'_>) + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    /// Chain over a fixed list of files
    pub fn files<S: Into<String>>(self, files: impl IntoIterator<Item = S>) -> Result<TableChain> {
        let files: Vec<String> = files.into_iter().map(Into::into).collect();
        if files.is_empty() {
            return Err(TreeError::NoFiles);
        }
        self.build(FileList::new(files))
    }

    /// Chain over files received from a channel. Blocks until the first
    /// readable file arrives.
    pub fn queue(self, receiver: Receiver<Option<String>>) -> Result<TableQueue> {
        self.build(FileQueue::new(receiver))
    }

    fn build<F: FileFeed>(self, feed: F) -> Result<TableChain<F>> {
        let mut chain = TableChain {
            name: self.name,
            feed,
            engine: self.engine,
            options: self.options,
            buffer: self.buffer,
            file: None,
            table: None,
            filters: self.filters,
            observers: self.observers,
            state: ChainState::Closed,
            pass: Pass::NotStarted,
            passed: 0,
            progress: None,
            stats: ChainStats::default(),
        };
        if !chain.rollover()? {
            return Err(TreeError::ChainInit(chain.name));
        }
        Ok(chain)
    }
}

/// The same table read across a sequence of files
pub struct TableChain<F: FileFeed = FileList> {
    name: String,
    feed: F,
    engine: Box<dyn StorageEngine>,
    options: ChainOptions,
    /// Held here while no table is open
    buffer: Option<RowBuffer>,
    file: Option<Box<dyn SourceFile>>,
    table: Option<Table>,
    filters: FilterPipeline,
    observers: Vec<FileObserver>,
    state: ChainState,
    pass: Pass,
    passed: u64,
    progress: Option<FileProgress>,
    stats: ChainStats,
}

/// A chain fed through a channel
pub type TableQueue = TableChain<FileQueue>;

impl TableChain<FileList> {
    /// Chain with default options over `files`
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        files: impl IntoIterator<Item = S>,
        engine: impl StorageEngine + 'static,
    ) -> Result<Self> {
        ChainBuilder::new(name, engine).files(files)
    }

    pub fn files(&self) -> &[String] {
        self.feed.files()
    }

    /// Rows across every readable file, opening each one
    pub fn total_entries(&self) -> u64 {
        let mut total = 0;
        for file in self.feed.files() {
            let path = expand_path(file);
            let source = self
                .engine
                .open(&path, OpenMode::Read)
                .ok()
                .and_then(|mut f| f.get(&self.name));
            match source {
                Some(SourceObject::Table(table)) => total += table.num_rows(),
                _ => debug!(target: "chain", "No `{}` table counted in {}", self.name, file),
            }
        }
        total
    }
}

impl<F: FileFeed> TableChain<F> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &ChainOptions {
        &self.options
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    pub fn stats(&self) -> &ChainStats {
        &self.stats
    }

    pub fn filters(&self) -> &FilterPipeline {
        &self.filters
    }

    pub fn filters_mut(&mut self) -> &mut FilterPipeline {
        &mut self.filters
    }

    pub fn current_table(&self) -> Option<&Table> {
        self.table.as_ref()
    }

    pub fn current_table_mut(&mut self) -> Option<&mut Table> {
        self.table.as_mut()
    }

    pub fn current_file(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path())
    }

    /// True if the current table has `column`
    pub fn contains(&self, column: &str) -> bool {
        self.table.as_ref().is_some_and(|t| t.has_column(column))
    }

    /// The shared buffer, whether or not a table is open
    pub fn buffer(&self) -> Option<&RowBuffer> {
        match self.table.as_ref() {
            Some(table) => Some(table.buffer()),
            None => self.buffer.as_ref(),
        }
    }

    pub fn buffer_mut(&mut self) -> Option<&mut RowBuffer> {
        match self.table.as_mut() {
            Some(table) => Some(table.buffer_mut()),
            None => self.buffer.as_mut(),
        }
    }

    /// Number of files. For queues this is not reliable.
    pub fn len(&mut self) -> usize {
        self.feed.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.feed.is_empty()
    }

    /// Close the current file and go back to the first one. The buffer is
    /// kept.
    pub fn reset(&mut self) {
        self.close_current();
        self.feed.rewind();
        self.pass = Pass::NotStarted;
        self.progress = None;
    }

    fn close_current(&mut self) {
        if let Some(table) = self.table.take() {
            self.buffer = Some(table.into_buffer());
        }
        if let Some(mut file) = self.file.take() {
            file.close();
        }
        self.state = ChainState::Closed;
    }

    /// Open the next readable file. Returns false once the feed is drained.
    fn rollover(&mut self) -> Result<bool> {
        while let Some(path) = self.feed.next_file() {
            info!(target: "chain", "current file: {}", path);
            self.close_current();

            let mut file = match self.engine.open(&expand_path(&path), OpenMode::Read) {
                Ok(file) => file,
                Err(e) => {
                    warn!(target: "chain", "could not open file {} (skipping): {}", path, e);
                    self.stats.files_skipped += 1;
                    continue;
                }
            };
            let source = match file.get(&self.name) {
                Some(SourceObject::Table(source)) => source,
                Some(SourceObject::Other { kind }) => {
                    warn!(
                        target: "chain",
                        "{} in file {} is a {}, not a table (skipping)",
                        self.name, path, kind
                    );
                    file.close();
                    self.stats.files_skipped += 1;
                    continue;
                }
                None => {
                    warn!(
                        target: "chain",
                        "table {} does not exist in file {} (skipping)",
                        self.name, path
                    );
                    file.close();
                    self.stats.files_skipped += 1;
                    continue;
                }
            };

            let mut table = Table::new(&self.name, source)
                .with_read_on_demand(self.options.read_on_demand)
                .with_always_read(self.options.always_read.clone());
            if table.columns().is_empty() {
                warn!(target: "chain", "table with no columns in file {} (skipping)", path);
                file.close();
                self.stats.files_skipped += 1;
                continue;
            }
            if let Some(allow) = &self.options.allow {
                table.activate(allow, true);
            }
            if !self.options.deny.is_empty() {
                table.deactivate(&self.options.deny, false);
            }

            let bound = match self.buffer.take() {
                None => table.build_schema(self.options.ignore_unsupported),
                Some(mut buffer) => {
                    let bind = BindOptions::default();
                    match table.check_binding(&buffer, &bind) {
                        Ok(()) => {
                            buffer.reset();
                            table.bind_buffer(buffer, &bind)
                        }
                        Err(e) => {
                            self.buffer = Some(buffer);
                            Err(e)
                        }
                    }
                }
            };
            if let Err(e) = bound {
                file.close();
                return Err(e);
            }

            if self.options.cache.enabled {
                info!(
                    target: "chain",
                    "enabling a {} cache for the current table ({} learning entries)",
                    humanize_bytes(self.options.cache.size_bytes, 1),
                    self.options.cache.learn_entries
                );
                table.set_cache_size(self.options.cache.size_bytes);
                table.set_cache_learn_entries(self.options.cache.learn_entries);
            }

            self.file = Some(file);
            let table = self.table.insert(table);
            self.state = ChainState::Open;
            self.stats.files_opened += 1;
            for observer in &mut self.observers {
                observer(FileChange {
                    name: &self.name,
                    path: &path,
                    table: &mut *table,
                });
            }
            return Ok(true);
        }
        self.close_current();
        self.state = ChainState::Exhausted;
        Ok(false)
    }

    fn begin_file(&mut self) {
        let now = Instant::now();
        self.progress = Some(FileProgress {
            entries: 0,
            total: self.table.as_ref().map_or(0, Table::len),
            started: now,
            last_report: now,
        });
    }

    fn end_file(&mut self) {
        if let Some(progress) = self.progress.take() {
            let elapsed = progress.started.elapsed().as_secs_f64();
            info!(target: "chain", "{}", format_rate(progress.entries, elapsed));
        }
        if let Some(file) = self.file.as_ref() {
            debug!(
                target: "chain",
                "read {} bytes in {} transactions",
                file.bytes_read(),
                file.read_calls()
            );
        }
    }

    fn report_progress(&mut self) {
        let interval = self.options.progress_interval();
        let Some(progress) = self.progress.as_mut() else {
            return;
        };
        progress.entries += 1;
        if progress.last_report.elapsed() <= interval {
            return;
        }
        let elapsed = progress.started.elapsed().as_secs_f64();
        let done = if progress.total > 0 {
            100.0 * progress.entries as f64 / progress.total as f64
        } else {
            100.0
        };
        info!(
            target: "chain",
            "{}. {:.0}% done current table.",
            format_rate(progress.entries, elapsed),
            done
        );
        progress.last_report = Instant::now();
    }

    fn finish(&mut self) -> Result<bool> {
        self.filters.finalize();
        self.pass = Pass::Done;
        self.progress = None;
        self.close_current();
        self.state = ChainState::Exhausted;
        Ok(false)
    }

    /// Move to the next accepted row. Returns false at the end of the pass.
    ///
    /// The first call of a pass rewinds to the first file. After the pass
    /// ends, call [`TableChain::reset`] to iterate again.
    pub fn advance(&mut self) -> Result<bool> {
        match self.pass {
            Pass::Done => return Ok(false),
            Pass::NotStarted => {
                self.reset();
                self.pass = Pass::Running;
                self.passed = 0;
                self.stats = ChainStats::default();
                if !self.rollover()? {
                    return self.finish();
                }
                self.begin_file();
            }
            Pass::Running => {}
        }

        loop {
            if self
                .options
                .max_events
                .is_some_and(|max| self.passed >= max)
            {
                return self.finish();
            }
            let Some(table) = self.table.as_mut() else {
                return self.finish();
            };
            if table.advance()? {
                self.stats.rows_read += 1;
                let accepted = self.filters.accept(table.buffer_mut())?;
                self.report_progress();
                if accepted {
                    self.passed += 1;
                    self.stats.rows_passed += 1;
                    return Ok(true);
                }
            } else {
                self.end_file();
                if !self.rollover()? {
                    return self.finish();
                }
                self.begin_file();
            }
        }
    }

    /// Lend the buffer for the next accepted row, or `None` at the end of
    /// the pass
    pub fn next_row(&mut self) -> Result<Option<&mut RowBuffer>> {
        if self.advance()? {
            Ok(self.table.as_mut().map(Table::buffer_mut))
        } else {
            Ok(None)
        }
    }

    /// Visit every remaining accepted row
    pub fn for_each_row(&mut self, mut f: impl FnMut(&mut RowBuffer) -> Result<()>) -> Result<()> {
        while let Some(row) = self.next_row()? {
            f(row)?;
        }
        Ok(())
    }
}
