//! Condition groups: named sets of diagnosis codes, and the windows they are reported in.
//!
//! The built-in dictionary is built once and shared. A different dictionary can be loaded from a
//! TOML file with one `[[group]]` table per group, e.g.
//!
//! ```toml
//! [[group]]
//! name = "dm"
//! kind = "chronic"
//! codes = ["E10-E14", "O24"]
//!
//! [[group]]
//! name = "sysconn"
//! kind = "other"
//! pattern = "M3[0-6]"
//! ```
use crate::{
    config::CohortConfig,
    episode::{Window, WindowPolicy},
    icd10::{CodePattern, CodeSet, CodeSetMatcher, IcdCode},
    ArcStr,
};
use once_cell::sync::Lazy;
use qu::ick_use::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt, fs, path::Path, sync::Arc};

/// The group whose `c_` column is the pregnancy-level outcome.
pub const ABORTIVE: &str = "abortive";

/// Delivery and labour groups that can't happen during a pregnancy that ended abortively.
pub const CONFLICT_GROUPS: &[&str] = &[
    "preecl", "ecl", "anh", "previa", "abrupt", "polyhydra", "abnamnio", "prom", "prolong",
    "preterm", "fail", "abnforce", "long", "malpres", "obspelvic", "iph", "distress", "umbilical",
    "laceration", "obstrau", "pph", "retained", "normal", "instrum", "caesar", "assisted",
    "multiple", "disprop", "malpresent", "abnorpelv", "placental",
];

/// The `c_` columns of `CONFLICT_GROUPS`.
pub fn conflict_columns() -> impl Iterator<Item = String> {
    CONFLICT_GROUPS
        .iter()
        .map(|group| Window::During.column(group))
}

const CHRONIC: &[(&str, &[&str])] = &[
    ("dm", &["E10-E14", "O24"]),
    ("malnut", &["E40-E46"]),
    ("nutri", &["E50-E64"]),
    ("obese", &["E66"]),
    ("substance", &["F10-F19"]),
    ("schizo", &["F20-F25", "F28", "F29"]),
    ("neurot", &["F40-F44", "F48", "F45"]),
    ("neu_deg", &["G10-G12", "G20-G26", "G30-G32", "G35-G37"]),
    ("headache", &["G43", "G44"]),
    ("neuropathy", &["G50-G64"]),
    ("rhd", &["I05-I09"]),
    ("ht", &["I10-I15", "O10", "O13", "O16"]),
    ("isch", &["I20-I25"]),
    ("phd", &["I26-I28"]),
    ("carditis", &["I30", "I32", "I33", "I38-I41"]),
    ("cmp", &["I42", "I43"]),
    ("arrythmia", &["I44", "I45", "I47-I49"]),
    ("hf", &["I50"]),
    ("stroke", &["I60-I64", "I69"]),
    ("artery", &["I70-I74", "I77-I79"]),
    ("vein", &["I80-I83", "I85-I89"]),
    ("chronic_res", &["J35", "J37", "J40-J45"]),
    ("pul_edema", &["J81"]),
    ("pleura", &["J90-J94"]),
    ("oral", &["K00-K14"]),
    ("gastritis", &["K22", "K25-K30"]),
    ("hernia", &["K40-K46"]),
    ("intestinal", &["K50-K52", "K56", "K58-K63"]),
    ("hemorrh", &["K64"]),
    ("periton", &["K65"]),
    ("liver_fail", &["K72"]),
    ("liver", &["K70", "K71", "K73-K76"]),
    ("gallbladder", &["K80-K83"]),
    ("pancreas", &["K85", "K86"]),
    ("bullous", &["L10-L14"]),
    ("atopic", &["L20"]),
    ("dermatitis", &["L21", "L23", "L25-L28", "L30"]),
    ("urticaria", &["L50"]),
    ("urolith", &["N20-N22"]),
    ("endomet", &["N80"]),
    ("femgen", &["N81-N90"]),
    ("hypomen", &["N91"]),
    ("menorrh", &["N92"]),
    ("dysmen", &["N94"]),
];

const INFECTIOUS: &[(&str, &[&str])] = &[
    ("typhoid", &["A01"]),
    ("cholera", &["A00"]),
    ("v_age", &["A08"]),
    ("b_age", &["A00", "A02-A05"]),
    ("p_age", &["A06", "A07"]),
    ("tb", &["A15-A19"]),
    ("myco", &["A30", "A31"]),
    ("lepto", &["A27"]),
    ("std", &["A51-A59", "A63", "A64"]),
    ("torch", &["B58", "B06", "B25", "B00", "A60"]),
    ("v_skin", &["B01-B05", "B07-B09"]),
    ("hepatitis", &["B15-B19"]),
    ("hiv", &["B20-B24"]),
    ("sepsis", &["A40", "A41"]),
    ("infla_cns", &["G00-G09"]),
    ("urti", &["J00-J06", "J09-J11"]),
    ("lrti", &["J12-J18", "J20-J22"]),
    ("uti", &["N30", "N34", "N39"]),
];

const PREGNANCY: &[(&str, &[&str])] = &[
    (ABORTIVE, &["O00-O08"]),
    ("preecl", &["O11", "O14"]),
    ("ecl", &["O15"]),
    ("earlyhemo", &["O20"]),
    ("heg", &["O21"]),
    ("venpreg", &["O22"]),
    ("utipreg", &["O23"]),
    ("malpreg", &["O25"]),
    ("multigest", &["O30"]),
    ("malpresent", &["O32"]),
    ("disprop", &["O33"]),
    ("abnorpelv", &["O34"]),
    ("fetalprob", &["O35", "O36"]),
    ("polyhydra", &["O40"]),
    ("abnamnio", &["O41"]),
    ("prom", &["O42"]),
    ("placental", &["O43"]),
    ("previa", &["O44"]),
    ("abrupt", &["O45"]),
    ("anh", &["O46"]),
    ("prolong", &["O48"]),
    ("preterm", &["O60"]),
    ("fail", &["O61"]),
    ("abnforce", &["O62"]),
    ("long", &["O63"]),
    ("obspelvic", &["O65", "O66"]),
    ("malpres", &["O64"]),
    ("iph", &["O67"]),
    ("distress", &["O68"]),
    ("umbilical", &["O69"]),
    ("laceration", &["O70"]),
    ("obstrau", &["O71"]),
    ("pph", &["O72"]),
    ("retained", &["O73"]),
    ("normal", &["O80"]),
    ("instrum", &["O81"]),
    ("caesar", &["O82"]),
    ("assisted", &["O83"]),
    ("multiple", &["O84"]),
];

const PATTERNS: &[(&str, &str)] = &[
    ("arthropathy", "M(0[0-9]|1[0-9]|2[0-5])"),
    ("sysconn", "M3[0-6]"),
    ("dorsopathy", "M4[0-9]|M5[0-4]"),
    ("muscle_dis", "M6[0-3]"),
    ("synov_dis", "M6[5-8]"),
    ("soft_dis", "M8[0-9]|M9[0-4]"),
    ("renal_dis", "N0[0-9]|N1[0-6]"),
    ("renal_fail", "N1[7-9]"),
    ("breast_dis", "N6[0-4]"),
    ("pid", "N7[0-7]"),
    ("poison", "T3[6-9]|T4[0-9]|T50"),
    ("toxic", "T5[1-9]|T6[0-5]"),
];

static BUILTIN: Lazy<Conditions> = Lazy::new(|| {
    Conditions::from_tables().expect("the built-in condition dictionary is valid")
});

/// What sort of condition a group describes. Groups are reported in this order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionKind {
    Chronic,
    Infectious,
    Pregnancy,
    /// Chronic groups defined by a pattern rather than a list.
    Other,
}

impl ConditionKind {
    pub fn policy(self) -> WindowPolicy {
        match self {
            ConditionKind::Chronic | ConditionKind::Other => WindowPolicy::Chronic,
            ConditionKind::Infectious => WindowPolicy::Infectious,
            ConditionKind::Pregnancy => WindowPolicy::Pregnancy,
        }
    }
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            ConditionKind::Chronic => "chronic",
            ConditionKind::Infectious => "infectious",
            ConditionKind::Pregnancy => "pregnancy",
            ConditionKind::Other => "other",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CodeMatcher {
    Codes(CodeSetMatcher),
    Pattern(CodePattern),
}

impl CodeMatcher {
    pub fn is_match(&self, code: IcdCode) -> bool {
        match self {
            CodeMatcher::Codes(codes) => codes.contains(code),
            CodeMatcher::Pattern(pattern) => pattern.is_match(code),
        }
    }
}

impl fmt::Display for CodeMatcher {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CodeMatcher::Codes(codes) => fmt::Display::fmt(&**codes, f),
            CodeMatcher::Pattern(pattern) => write!(f, "/{}/", pattern),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionGroup {
    pub name: ArcStr,
    pub kind: ConditionKind,
    pub matcher: CodeMatcher,
}

impl ConditionGroup {
    pub fn codes(name: &str, kind: ConditionKind, codes: CodeSet) -> Self {
        Self {
            name: name.into(),
            kind,
            matcher: CodeMatcher::Codes(codes.into_matcher()),
        }
    }

    pub fn pattern(name: &str, kind: ConditionKind, pattern: CodePattern) -> Self {
        Self {
            name: name.into(),
            kind,
            matcher: CodeMatcher::Pattern(pattern),
        }
    }

    /// True if any of the codes is in this group.
    pub fn matches(&self, codes: &[Option<IcdCode>]) -> bool {
        codes.iter().flatten().any(|code| self.matcher.is_match(*code))
    }

    pub fn policy(&self) -> WindowPolicy {
        self.kind.policy()
    }

    /// The exposure columns of this group, in order.
    pub fn columns(&self) -> impl Iterator<Item = String> + '_ {
        self.policy()
            .windows()
            .iter()
            .map(|window| window.column(&self.name))
    }
}

/// An ordered, immutable collection of condition groups.
#[derive(Debug, Clone)]
pub struct Conditions {
    groups: Arc<Vec<ConditionGroup>>,
    abortive: usize,
}

impl Conditions {
    /// Groups are ordered by kind, keeping their relative order otherwise.
    ///
    /// Names must be unique, and there must be a pregnancy group called `abortive`.
    pub fn new(mut groups: Vec<ConditionGroup>) -> Result<Self> {
        groups.sort_by_key(|g| g.kind);
        let mut seen = BTreeSet::new();
        for group in groups.iter() {
            ensure!(
                seen.insert(group.name.clone()),
                "condition group \"{}\" is defined more than once",
                group.name
            );
        }
        let abortive = groups
            .iter()
            .position(|g| &*g.name == ABORTIVE && g.kind == ConditionKind::Pregnancy)
            .with_context(|| format!("there must be a pregnancy group called \"{}\"", ABORTIVE))?;
        Ok(Self {
            groups: Arc::new(groups),
            abortive,
        })
    }

    /// The standard dictionary.
    pub fn builtin() -> &'static Conditions {
        &BUILTIN
    }

    /// The dictionary named in the config, or the built-in one.
    pub fn from_config(config: &CohortConfig) -> Result<Self> {
        match &config.conditions {
            Some(path) => Self::load(path),
            None => Ok(Self::builtin().clone()),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        fn inner(path: &Path) -> Result<Conditions> {
            let text = fs::read_to_string(path)?;
            let dict: DictionaryDef = toml::from_str(&text)?;
            let groups = dict
                .group
                .into_iter()
                .map(GroupDef::into_group)
                .collect::<Result<Vec<_>>>()?;
            Conditions::new(groups)
        }
        let path = path.as_ref();
        let conditions = inner(path)
            .with_context(|| format!("loading condition groups from \"{}\"", path.display()))?;
        event!(
            Level::INFO,
            "loaded {} condition groups from \"{}\"",
            conditions.len(),
            path.display()
        );
        Ok(conditions)
    }

    fn from_tables() -> Result<Self> {
        let mut groups = Vec::new();
        for (kind, table) in [
            (ConditionKind::Chronic, CHRONIC),
            (ConditionKind::Infectious, INFECTIOUS),
            (ConditionKind::Pregnancy, PREGNANCY),
        ] {
            for (name, codes) in table {
                groups.push(ConditionGroup::codes(
                    name,
                    kind,
                    CodeSet::parse(codes.iter().copied())?,
                ));
            }
        }
        for (name, pattern) in PATTERNS {
            groups.push(ConditionGroup::pattern(
                name,
                ConditionKind::Other,
                CodePattern::new(pattern)?,
            ));
        }
        Self::new(groups)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConditionGroup> + '_ {
        self.groups.iter()
    }

    pub fn of_kind(&self, kind: ConditionKind) -> impl Iterator<Item = &ConditionGroup> + '_ {
        self.groups.iter().filter(move |g| g.kind == kind)
    }

    pub fn get(&self, name: &str) -> Option<&ConditionGroup> {
        self.groups.iter().find(|g| &*g.name == name)
    }

    pub fn abortive(&self) -> &ConditionGroup {
        &self.groups[self.abortive]
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Every exposure column, in output order.
    pub fn columns(&self) -> Vec<String> {
        self.groups.iter().flat_map(|g| g.columns()).collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DictionaryDef {
    group: Vec<GroupDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GroupDef {
    name: String,
    kind: ConditionKind,
    #[serde(default)]
    codes: Vec<String>,
    #[serde(default, with = "serde_regex")]
    pattern: Option<Regex>,
}

impl GroupDef {
    fn into_group(self) -> Result<ConditionGroup> {
        ensure!(
            !self.name.is_empty() && !self.name.contains(','),
            "invalid group name \"{}\"",
            self.name
        );
        match (self.codes.is_empty(), self.pattern) {
            (false, None) => {
                let codes = CodeSet::parse(self.codes.iter().map(String::as_str))
                    .with_context(|| format!("in group \"{}\"", self.name))?;
                Ok(ConditionGroup::codes(&self.name, self.kind, codes))
            }
            (true, Some(pattern)) => Ok(ConditionGroup::pattern(
                &self.name,
                self.kind,
                CodePattern::from_regex(&pattern)?,
            )),
            _ => bail!(
                "group \"{}\" must have exactly one of `codes` or `pattern`",
                self.name
            ),
        }
    }
}
