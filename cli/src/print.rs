use chrono::{DateTime, Utc};
use chrono_humanize::HumanTime;
use colored::Colorize;
use models::device::{DeviceRecord, DeviceStatus};
use std::borrow::Cow;
use unicode_width::UnicodeWidthStr;

pub struct TablePrint {
    headers: Vec<Cow<'static, str>>,
    rows: Vec<Vec<String>>,
}

impl TablePrint {
    pub fn new_with_headers<S: Into<Cow<'static, str>>>(headers: Vec<S>) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn add_row(&mut self, row: Vec<String>) -> &mut Self {
        self.rows.push(row);
        self
    }

    /// Visible width of each column, ignoring color escapes.
    fn column_widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.width()).collect();
        for row in &self.rows {
            for (width, item) in widths.iter_mut().zip(row) {
                *width = (*width).max(strip_ansi_escapes::strip_str(item).width());
            }
        }
        widths
    }

    pub fn render(&self) -> String {
        let widths = self.column_widths();
        let mut out = String::new();

        let cells = self.headers.iter().map(|h| h.to_string());
        push_line(&mut out, cells, &widths);
        for row in &self.rows {
            push_line(&mut out, row.iter().cloned(), &widths);
        }
        out
    }

    pub fn print(&self) {
        print!("{}", self.render());
    }
}

fn push_line(out: &mut String, cells: impl Iterator<Item = String>, widths: &[usize]) {
    let line: Vec<String> = cells
        .zip(widths)
        .map(|(cell, width)| {
            let padding = width.saturating_sub(strip_ansi_escapes::strip_str(&cell).width());
            format!("{cell}{:padding$}", "")
        })
        .collect();
    out.push_str(line.join("   ").trim_end());
    out.push('\n');
}

pub fn colored_status(status: DeviceStatus) -> String {
    match status {
        DeviceStatus::InSchool => status.to_string().bright_green().to_string(),
        DeviceStatus::OutSchool => status.to_string().bright_blue().to_string(),
    }
}

pub fn humanized(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| HumanTime::from(t).to_string())
        .unwrap_or_else(|| "never".dimmed().to_string())
}

pub fn devices_table(devices: &[DeviceRecord]) -> TablePrint {
    let mut table = TablePrint::new_with_headers(vec![
        "ID",
        "SERIAL",
        "MODEL",
        "REGISTRATION",
        "STATUS",
        "VERIFIED",
        "MISMATCH",
    ]);
    for device in devices {
        let mismatch = if device.sn_mismatch {
            "yes".red().bold().to_string()
        } else {
            String::new()
        };
        table.add_row(vec![
            device.id.to_string(),
            device.serial_number.clone(),
            device.model.clone().unwrap_or_default(),
            device.registration_number.clone(),
            colored_status(device.status),
            humanized(device.last_verified_at),
            mismatch,
        ]);
    }
    table
}
