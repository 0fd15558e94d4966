use std::fmt;
use std::str::FromStr;

/// Opaque content-addressed identifier for a primary job's sequence cluster.
pub type IdHash = String;

/// Identifies either a primary job (`num_subjobs == 1`) or one chunk of a
/// split primary job, per spec.md's compound id format
/// `<subjob_num>_<num_subjobs>_<id_hash>`.
///
/// `id_hash` values must not themselves contain `_`, matching the original
/// worker's `full_name.split("_")` unpacking (an id_hash with an embedded
/// underscore would be ambiguous with the compound form).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobHash {
    pub subjob_num: u32,
    pub num_subjobs: u32,
    pub id_hash: IdHash,
}

impl JobHash {
    pub fn primary(id_hash: impl Into<IdHash>) -> Self {
        Self {
            subjob_num: 1,
            num_subjobs: 1,
            id_hash: id_hash.into(),
        }
    }

    pub fn subjob(id_hash: impl Into<IdHash>, subjob_num: u32, num_subjobs: u32) -> Self {
        Self {
            subjob_num,
            num_subjobs,
            id_hash: id_hash.into(),
        }
    }

    pub fn is_primary(&self) -> bool {
        self.num_subjobs == 1
    }

    /// The `hash LIKE '%_<id_hash>'` fan-in pattern used to count sibling
    /// sub-job completions for this job's `id_hash`.
    pub fn sibling_glob(&self) -> String {
        format!("%_{}", self.id_hash)
    }
}

impl fmt::Display for JobHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_primary() {
            write!(f, "{}", self.id_hash)
        } else {
            write!(f, "{}_{}_{}", self.subjob_num, self.num_subjobs, self.id_hash)
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("malformed job hash: {0}")]
pub struct ParseJobHashError(String);

impl FromStr for JobHash {
    type Err = ParseJobHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('_').collect();
        if parts.len() == 3 {
            if let (Ok(subjob_num), Ok(num_subjobs)) =
                (parts[0].parse::<u32>(), parts[1].parse::<u32>())
            {
                return Ok(JobHash {
                    subjob_num,
                    num_subjobs,
                    id_hash: parts[2].to_string(),
                });
            }
        }
        if s.is_empty() {
            return Err(ParseJobHashError(s.to_string()));
        }
        Ok(JobHash::primary(s.to_string()))
    }
}
