use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// ECR repository names: lowercase components joined by `.`, `_` or `-`,
/// optionally namespaced with `/`.
static REPOSITORY_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-z0-9]+(?:[._-][a-z0-9]+)*/)*[a-z0-9]+(?:[._-][a-z0-9]+)*$")
        .expect("repository name pattern is valid")
});

static REGION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z]{2,}(?:-[a-z]+)+-\d+$").expect("region pattern is valid")
});

const MAX_REPOSITORY_NAME_LEN: usize = 256;

/// Error returned when a repository reference cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid ECR repository reference '{reference}': {reason}")]
pub struct ParseError {
    pub reference: String,
    pub reason: String,
}

impl ParseError {
    fn new(reference: &str, reason: impl Into<String>) -> Self {
        Self {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }
}

/// A parsed ECR repository reference
///
/// Accepts either the repository ARN
/// (`arn:aws:ecr:eu-west-1:123456789012:repository/team/app`) or the registry
/// URI (`123456789012.dkr.ecr.eu-west-1.amazonaws.com/team/app`). Formatting
/// always yields the ARN.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryArn {
    partition: String,
    region: String,
    account_id: String,
    repository: String,
}

impl RepositoryArn {
    /// Parse a repository ARN or registry URI
    pub fn parse(reference: &str) -> Result<Self, ParseError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ParseError::new(reference, "reference is empty"));
        }

        let parsed = if reference.starts_with("arn:") {
            Self::parse_arn(reference)?
        } else {
            Self::parse_registry_uri(reference)?
        };

        parsed.validate(reference)?;
        Ok(parsed)
    }

    fn parse_arn(reference: &str) -> Result<Self, ParseError> {
        let fields: Vec<&str> = reference.splitn(6, ':').collect();
        if fields.len() != 6 {
            return Err(ParseError::new(
                reference,
                format!("expected 6 ':'-separated fields, found {}", fields.len()),
            ));
        }

        let (partition, service, region, account_id, resource) =
            (fields[1], fields[2], fields[3], fields[4], fields[5]);

        if partition.is_empty() {
            return Err(ParseError::new(reference, "partition is empty"));
        }
        if service != "ecr" {
            return Err(ParseError::new(
                reference,
                format!("expected service 'ecr', found '{}'", service),
            ));
        }

        let repository = resource.strip_prefix("repository/").ok_or_else(|| {
            ParseError::new(reference, "resource must start with 'repository/'")
        })?;

        Ok(Self {
            partition: partition.to_string(),
            region: region.to_string(),
            account_id: account_id.to_string(),
            repository: repository.to_string(),
        })
    }

    fn parse_registry_uri(reference: &str) -> Result<Self, ParseError> {
        let (host, repository) = reference
            .split_once('/')
            .ok_or_else(|| ParseError::new(reference, "missing repository name"))?;

        // <account>.dkr.ecr.<region>.amazonaws.com[.cn]
        let labels: Vec<&str> = host.split('.').collect();
        let partition = match labels.as_slice() {
            [_, "dkr", "ecr", _, "amazonaws", "com"] => "aws",
            [_, "dkr", "ecr", _, "amazonaws", "com", "cn"] => "aws-cn",
            _ => {
                return Err(ParseError::new(
                    reference,
                    format!("'{}' is not an ECR registry host", host),
                ))
            }
        };

        if repository.contains(':') || repository.contains('@') {
            return Err(ParseError::new(
                reference,
                "reference must name a repository, not a tag or digest",
            ));
        }

        Ok(Self {
            partition: partition.to_string(),
            region: labels[3].to_string(),
            account_id: labels[0].to_string(),
            repository: repository.to_string(),
        })
    }

    fn validate(&self, reference: &str) -> Result<(), ParseError> {
        if !REGION.is_match(&self.region) {
            return Err(ParseError::new(
                reference,
                format!("'{}' is not a valid region", self.region),
            ));
        }
        if self.account_id.len() != 12 || !self.account_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::new(
                reference,
                format!("account ID '{}' must be 12 digits", self.account_id),
            ));
        }
        if self.repository.is_empty() {
            return Err(ParseError::new(reference, "repository name is empty"));
        }
        if self.repository.len() > MAX_REPOSITORY_NAME_LEN {
            return Err(ParseError::new(
                reference,
                format!(
                    "repository name exceeds {} characters",
                    MAX_REPOSITORY_NAME_LEN
                ),
            ));
        }
        if !REPOSITORY_NAME.is_match(&self.repository) {
            return Err(ParseError::new(
                reference,
                format!("'{}' is not a valid repository name", self.repository),
            ));
        }
        Ok(())
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// The account ID, which is also the ECR registry ID
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Repository name including any namespace (e.g. "team/app")
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Registry host for `docker pull`/`push`
    pub fn registry_host(&self) -> String {
        let suffix = if self.partition == "aws-cn" {
            "amazonaws.com.cn"
        } else {
            "amazonaws.com"
        };
        format!("{}.dkr.ecr.{}.{}", self.account_id, self.region, suffix)
    }
}

impl fmt::Display for RepositoryArn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:ecr:{}:{}:repository/{}",
            self.partition, self.region, self.account_id, self.repository
        )
    }
}

impl FromStr for RepositoryArn {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
