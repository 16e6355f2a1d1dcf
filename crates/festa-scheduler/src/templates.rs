//! Congratulation templates. One is picked at random per celebrant.

use festa_core::config::TemplatesConfig;
use festa_core::types::{NamedRecord, RecordKind};
use rand::Rng;
use rand::seq::SliceRandom;

use crate::recurrence::years_since;

const BIRTHDAY: &[&str] = &[
    "🎉 Happy birthday, {name}! Wishing you happiness, health and every wish come true! 🎂",
    "🎊 Happy birthday, {name}! May today bring you joy and plenty of smiles! 🎈",
    "🎁 Dear {name}, happy birthday! Bright moments and a great mood to you! ✨",
    "🌟 {name}, happy birthday! Only good things ahead! 🎉",
    "🎂 Happy birthday to {name}! Good health and a sea of positivity! 🎊",
];

const WEDDING: &[&str] = &[
    "💒 Happy anniversary, {name}! {years} years together — wonderful! \
     Strong love and family happiness to you! 💕",
    "👰🤵 {name}, happy wedding anniversary! {years} years of married life is a real achievement! 🥂",
    "💝 Dear {name}! Congratulations on {years} years of marriage! \
     May your love grow stronger every year! 🌹",
    "🎊 {name}, happy anniversary! {years} years ago you both said 'Yes' — \
     the best decision ever! 💍",
    "✨ Happy wedding anniversary, {name}! {years} happy years behind you, even more ahead! 🎉",
];

const WEDDING_WITHOUT_YEARS: &[&str] = &[
    "💒 Happy wedding anniversary, {name}! Strong love and family happiness to you! 💕",
    "💍 {name}, happy anniversary! May every year together be better than the last! 🥂",
];

const BIRTHDAY_HEADER: &str = "🎉 Birthday reminder!";
const WEDDING_HEADER: &str = "💒 Wedding anniversary reminder!";

/// Template sets for every record kind.
#[derive(Debug, Clone)]
pub struct Templates {
    birthday: Vec<String>,
    wedding: Vec<String>,
    wedding_without_years: Vec<String>,
}

impl Default for Templates {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Templates {
    pub fn builtin() -> Self {
        Self {
            birthday: owned(BIRTHDAY),
            wedding: owned(WEDDING),
            wedding_without_years: owned(WEDDING_WITHOUT_YEARS),
        }
    }

    /// Configured lists replace the built-in ones; empty lists keep them.
    pub fn from_config(config: &TemplatesConfig) -> Self {
        let pick = |custom: &Vec<String>, builtin: &[&str]| {
            if custom.is_empty() {
                owned(builtin)
            } else {
                custom.clone()
            }
        };
        Self {
            birthday: pick(&config.birthday, BIRTHDAY),
            wedding: pick(&config.wedding, WEDDING),
            wedding_without_years: pick(&config.wedding_without_years, WEDDING_WITHOUT_YEARS),
        }
    }

    /// Pick and fill a template, without the reminder header.
    pub fn congratulation<R: Rng + ?Sized>(
        &self,
        kind: RecordKind,
        record: &NamedRecord,
        year: i32,
        rng: &mut R,
    ) -> String {
        let years = years_since(&record.date, year).filter(|y| *y > 0);
        let list = match (kind, years) {
            (RecordKind::Birthday, _) => &self.birthday,
            (RecordKind::Wedding, Some(_)) => &self.wedding,
            (RecordKind::Wedding, None) => &self.wedding_without_years,
        };
        let template = list.choose(rng).map(String::as_str).unwrap_or("{name}");
        let mut text = template.replace("{name}", &record.label);
        if let Some(y) = years {
            text = text.replace("{years}", &y.to_string());
        }
        text
    }

    /// Full reminder message for the daily firing.
    pub fn compose<R: Rng + ?Sized>(
        &self,
        kind: RecordKind,
        record: &NamedRecord,
        year: i32,
        rng: &mut R,
    ) -> String {
        let header = match kind {
            RecordKind::Birthday => BIRTHDAY_HEADER,
            RecordKind::Wedding => WEDDING_HEADER,
        };
        format!("{header}\n\n{}", self.congratulation(kind, record, year, rng))
    }
}

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}
