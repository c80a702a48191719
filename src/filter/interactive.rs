//! Interactive filtering
//!
//! A line-oriented state machine. Each step asks one question through a [`Prompter`]
//! and moves to the next state. Invalid answers re-prompt without changing state,
//! `exit` ends the session from any state and `restart` discards every filter applied
//! so far.

use super::{apply_date_range, apply_field_values, apply_year, DateRange, FilterField, FilterOutcome};
use crate::data::StructureTable;
use crate::schema::{INCIDENT_NAME, START_DATE};
use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, BufRead, Write};
use tracing::{debug, info};

/// Line-oriented question/answer channel
pub trait Prompter {
    /// Show `prompt` and return the user's answer
    fn ask(&mut self, prompt: &str) -> Result<String>;

    /// Show an informational message
    fn show(&mut self, message: &str);
}

/// Prompter over stdin/stdout; end of input counts as `exit`
#[derive(Debug, Default)]
pub struct StdioPrompter;

impl Prompter for StdioPrompter {
    fn ask(&mut self, prompt: &str) -> Result<String> {
        print!("{} ", prompt);
        io::stdout().flush().context("Failed to flush stdout")?;

        let mut line = String::new();
        let read = io::stdin()
            .lock()
            .read_line(&mut line)
            .context("Failed to read from stdin")?;
        if read == 0 {
            return Ok("exit".to_string());
        }
        Ok(line.trim().to_string())
    }

    fn show(&mut self, message: &str) {
        println!("{}", message);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractiveState {
    AskDateFilter,
    ApplyDateFilter,
    AskOtherFilter,
    ChooseField,
    /// Year for a Wildfire Name filter when no date range was applied
    ChooseYear,
    ChooseValues(FilterField),
    Done,
    Exit,
}

impl InteractiveState {
    pub fn is_terminal(self) -> bool {
        matches!(self, InteractiveState::Done | InteractiveState::Exit)
    }
}

enum Reply {
    Answer(String),
    /// The reply was `exit` or `restart` and the state already moved
    Handled,
}

pub struct InteractiveFilter<'a> {
    original: StructureTable,
    current: StructureTable,
    date_filtered: bool,
    state: InteractiveState,
    prompter: &'a mut dyn Prompter,
}

impl<'a> InteractiveFilter<'a> {
    pub fn new(table: StructureTable, prompter: &'a mut dyn Prompter) -> Self {
        Self {
            current: table.clone(),
            original: table,
            date_filtered: false,
            state: InteractiveState::AskDateFilter,
            prompter,
        }
    }

    pub fn state(&self) -> InteractiveState {
        self.state
    }

    /// Records selected so far
    pub fn current(&self) -> &StructureTable {
        &self.current
    }

    /// Drive the machine to a terminal state
    pub fn run(mut self) -> Result<FilterOutcome> {
        while !self.state.is_terminal() {
            self.step()?;
        }
        Ok(match self.state {
            InteractiveState::Exit => {
                info!("Interactive filtering cancelled");
                FilterOutcome::Exited
            }
            _ => FilterOutcome::Filtered(self.current),
        })
    }

    /// Ask one question and transition
    pub fn step(&mut self) -> Result<()> {
        debug!("Interactive filter state: {:?}", self.state);
        match self.state {
            InteractiveState::AskDateFilter => self.ask_date_filter(),
            InteractiveState::ApplyDateFilter => self.apply_date_filter(),
            InteractiveState::AskOtherFilter => self.ask_other_filter(),
            InteractiveState::ChooseField => self.choose_field(),
            InteractiveState::ChooseYear => self.choose_year(),
            InteractiveState::ChooseValues(field) => self.choose_values(field),
            InteractiveState::Done | InteractiveState::Exit => Ok(()),
        }
    }

    fn read(&mut self, prompt: &str) -> Result<Reply> {
        let answer = self.prompter.ask(prompt)?;
        let trimmed = answer.trim();
        if trimmed.eq_ignore_ascii_case("exit") {
            self.state = InteractiveState::Exit;
            return Ok(Reply::Handled);
        }
        if trimmed.eq_ignore_ascii_case("restart") {
            self.prompter.show("Restarting: all filters cleared.");
            self.current = self.original.clone();
            self.date_filtered = false;
            self.state = InteractiveState::AskDateFilter;
            return Ok(Reply::Handled);
        }
        Ok(Reply::Answer(trimmed.to_string()))
    }

    fn invalid(&mut self, answer: &str) {
        self.prompter
            .show(&format!("Invalid response '{}'. Please try again.", answer));
    }

    fn ask_date_filter(&mut self) -> Result<()> {
        if let Some((first, last)) = date_span(&self.current)? {
            self.prompter
                .show(&format!("Records span {} to {}.", first, last));
        }
        let Reply::Answer(answer) = self.read("Filter by date range? (yes/no)")? else {
            return Ok(());
        };
        match parse_yes_no(&answer) {
            Some(true) => self.state = InteractiveState::ApplyDateFilter,
            Some(false) => self.state = InteractiveState::AskOtherFilter,
            None => self.invalid(&answer),
        }
        Ok(())
    }

    fn apply_date_filter(&mut self) -> Result<()> {
        let Reply::Answer(start) = self.read("Start date (YYYY-MM-DD):")? else {
            return Ok(());
        };
        let Reply::Answer(end) = self.read("End date (YYYY-MM-DD):")? else {
            return Ok(());
        };

        let range = match (parse_date(&start), parse_date(&end)) {
            (Some(s), Some(e)) => DateRange::new(s, e).ok(),
            _ => None,
        };
        let Some(range) = range else {
            self.invalid(&format!("{} to {}", start, end));
            return Ok(());
        };

        self.current = apply_date_range(&self.current, &range)?;
        self.date_filtered = true;
        self.prompter
            .show(&format!("{} records between {}.", self.current.height(), range));
        self.state = InteractiveState::AskOtherFilter;
        Ok(())
    }

    fn ask_other_filter(&mut self) -> Result<()> {
        let Reply::Answer(answer) = self.read("Apply another filter? (yes/no)")? else {
            return Ok(());
        };
        match parse_yes_no(&answer) {
            Some(true) => self.state = InteractiveState::ChooseField,
            Some(false) => self.state = InteractiveState::Done,
            None => self.invalid(&answer),
        }
        Ok(())
    }

    fn choose_field(&mut self) -> Result<()> {
        let menu = FilterField::ALL
            .iter()
            .enumerate()
            .map(|(i, f)| format!("  {}. {}", i + 1, f))
            .collect::<Vec<_>>()
            .join("\n");
        self.prompter.show(&format!("Filter fields:\n{}", menu));

        let Reply::Answer(answer) = self.read("Choose a field:")? else {
            return Ok(());
        };
        let field = match answer.parse::<usize>() {
            Ok(n) if (1..=FilterField::ALL.len()).contains(&n) => Some(FilterField::ALL[n - 1]),
            Ok(_) => None,
            Err(_) => answer.parse::<FilterField>().ok(),
        };

        match field {
            Some(FilterField::WildfireName) if !self.date_filtered => {
                self.state = InteractiveState::ChooseYear
            }
            Some(field) => self.state = InteractiveState::ChooseValues(field),
            None => self.invalid(&answer),
        }
        Ok(())
    }

    fn choose_year(&mut self) -> Result<()> {
        let years = available_years(&self.current)?;
        if years.is_empty() {
            self.prompter.show("No dated records available.");
            self.state = InteractiveState::AskOtherFilter;
            return Ok(());
        }
        let listing = years.iter().map(|y| y.to_string()).collect::<Vec<_>>().join(", ");
        self.prompter.show(&format!("Available years: {}", listing));

        let Reply::Answer(answer) = self.read("Choose a year:")? else {
            return Ok(());
        };
        match answer.parse::<i32>() {
            Ok(year) if years.contains(&year) => {
                self.current = apply_year(&self.current, year)?;
                self.state = InteractiveState::ChooseValues(FilterField::WildfireName);
            }
            _ => self.invalid(&answer),
        }
        Ok(())
    }

    fn choose_values(&mut self, field: FilterField) -> Result<()> {
        let options: Vec<(String, String)> = if field == FilterField::WildfireName {
            incident_listing(&self.current)?
                .into_iter()
                .map(|(name, (first, count))| {
                    let start = first.map(|d| d.to_string()).unwrap_or_else(|| "unknown".into());
                    let label = format!("{} (Start: {}, Records: {})", name, start, count);
                    (name, label)
                })
                .collect()
        } else {
            value_counts(&self.current, field.column())?
                .into_iter()
                .map(|(value, count)| {
                    let label = format!("{} (Records: {})", value, count);
                    (value, label)
                })
                .collect()
        };

        if options.is_empty() {
            self.prompter.show(&format!("No {} values available.", field));
            self.state = InteractiveState::AskOtherFilter;
            return Ok(());
        }

        let menu = options
            .iter()
            .enumerate()
            .map(|(i, (_, label))| format!("  {}. {}", i + 1, label))
            .collect::<Vec<_>>()
            .join("\n");
        self.prompter.show(&format!("{} values:\n{}", field, menu));

        let Reply::Answer(answer) = self.read("Choose one or more numbers, comma separated:")? else {
            return Ok(());
        };
        let Some(picks) = parse_choices(&answer, options.len()) else {
            self.invalid(&answer);
            return Ok(());
        };

        let values: Vec<&str> = picks.iter().map(|&i| options[i].0.as_str()).collect();
        self.current = apply_field_values(&self.current, field, &values)?;
        self.prompter
            .show(&format!("{} records selected.", self.current.height()));
        self.state = InteractiveState::AskOtherFilter;
        Ok(())
    }
}

fn parse_yes_no(answer: &str) -> Option<bool> {
    match answer.to_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

fn parse_date(answer: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(answer.trim(), "%Y-%m-%d").ok()
}

/// 1-based comma-separated picks → 0-based indices, de-duplicated in order
fn parse_choices(answer: &str, len: usize) -> Option<Vec<usize>> {
    let mut picks = Vec::new();
    for part in answer.split(',') {
        let n: usize = part.trim().parse().ok()?;
        if n == 0 || n > len {
            return None;
        }
        if !picks.contains(&(n - 1)) {
            picks.push(n - 1);
        }
    }
    Some(picks)
}

fn start_dates(table: &StructureTable) -> Result<Vec<Option<NaiveDate>>> {
    if !table.has_column(START_DATE) {
        return Ok(Vec::new());
    }
    let dates = table.frame().column(START_DATE)?.as_materialized_series().date()?.clone();
    Ok(dates.as_date_iter().collect())
}

/// Earliest and latest start date
fn date_span(table: &StructureTable) -> Result<Option<(NaiveDate, NaiveDate)>> {
    let dates = start_dates(table)?;
    let mut known = dates.into_iter().flatten();
    let Some(first) = known.next() else {
        return Ok(None);
    };
    Ok(Some(known.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d)))))
}

fn available_years(table: &StructureTable) -> Result<Vec<i32>> {
    let years: BTreeSet<i32> = start_dates(table)?
        .into_iter()
        .flatten()
        .map(|d| d.year())
        .collect();
    Ok(years.into_iter().collect())
}

/// Incident name → (first start date, record count), sorted by name
fn incident_listing(table: &StructureTable) -> Result<BTreeMap<String, (Option<NaiveDate>, usize)>> {
    let mut listing: BTreeMap<String, (Option<NaiveDate>, usize)> = BTreeMap::new();
    if !table.has_column(INCIDENT_NAME) {
        return Ok(listing);
    }
    let names = table.frame().column(INCIDENT_NAME)?.cast(&DataType::String)?;
    let dates = start_dates(table)?;

    for (idx, name) in names.str()?.into_iter().enumerate() {
        let Some(name) = name else { continue };
        let date = dates.get(idx).copied().flatten();
        let entry = listing.entry(name.to_string()).or_insert((None, 0));
        entry.1 += 1;
        entry.0 = match (entry.0, date) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }
    Ok(listing)
}

/// Distinct non-null values with record counts, in order of first appearance
fn value_counts(table: &StructureTable, column: &str) -> Result<Vec<(String, usize)>> {
    if !table.has_column(column) {
        return Ok(Vec::new());
    }
    let values = table.frame().column(column)?.cast(&DataType::String)?;
    let mut order: Vec<String> = Vec::new();
    let mut counts: FxHashMap<String, usize> = FxHashMap::default();

    for value in values.str()?.into_iter().flatten() {
        let count = counts.entry(value.to_string()).or_insert_with(|| {
            order.push(value.to_string());
            0
        });
        *count += 1;
    }
    Ok(order
        .into_iter()
        .map(|v| {
            let n = counts[&v];
            (v, n)
        })
        .collect())
}
