//! Resource pattern catalog
//!
//! The catalog is an ordered list of detection rules. Order is precedence:
//! when two rules match overlapping text, the earlier rule wins and the
//! later match is discarded. Specific shapes (ARNs, prefixed ids) come before
//! generic ones (account numbers, name heuristics) so that, for example, the
//! account id inside an ARN is masked as part of the ARN.

use crate::config::MaskingConfig;
use cloudmask_core::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};
use tracing::{debug, warn};

/// Predicate applied to a raw match before it is accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validator {
    /// Accept only globally routable IPv4 addresses
    PublicIpv4,
    /// Accept well-formed IPv6 addresses other than loopback and unspecified
    Ipv6,
}

impl Validator {
    /// Whether `candidate` passes this validator
    pub fn accepts(&self, candidate: &str) -> bool {
        match self {
            Validator::PublicIpv4 => is_public_ipv4(candidate),
            Validator::Ipv6 => is_routable_ipv6(candidate),
        }
    }
}

/// Returns true when `candidate` is a dotted IPv4 address outside the
/// private, loopback, link-local, "this network", multicast and reserved ranges.
pub fn is_public_ipv4(candidate: &str) -> bool {
    let Ok(addr) = candidate.parse::<Ipv4Addr>() else {
        return false;
    };
    let first = addr.octets()[0];

    !(addr.is_private()
        || addr.is_loopback()
        || addr.is_link_local()
        || first == 0
        || first >= 224)
}

/// Returns true for a parseable IPv6 address that is neither `::` nor `::1`.
/// Clock times such as `12:30:45` do not parse and are rejected.
pub fn is_routable_ipv6(candidate: &str) -> bool {
    candidate
        .parse::<Ipv6Addr>()
        .map_or(false, |addr| !(addr.is_loopback() || addr.is_unspecified()))
}

/// Serializable description of a detection rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSpec {
    /// Category id, e.g. `ec2_instance`
    pub category: String,

    /// Token prefix, e.g. `AWS_EC2`
    pub prefix: String,

    /// Regular expression over raw text
    pub pattern: String,

    #[serde(default)]
    pub validator: Option<Validator>,

    #[serde(default)]
    pub description: String,
}

/// Built-in AWS rules in precedence order: (category, prefix, regex, validator, description)
const BUILTIN: &[(&str, &str, &str, Option<Validator>, &str)] = &[
    (
        "sqs_queue",
        "AWS_SQS_QUEUE",
        r"\bhttps://sqs\.[a-z0-9-]+\.amazonaws\.com/\d{12}/[A-Za-z0-9_-]*[A-Za-z0-9_](?:\.fifo)?\b",
        None,
        "SQS queue URL",
    ),
    (
        "elb_arn",
        "AWS_ELB_ARN",
        r"\barn:aws[a-z-]*:elasticloadbalancing:[a-z0-9-]+:\d{12}:loadbalancer/[A-Za-z0-9/_-]*[A-Za-z0-9_]\b",
        None,
        "Elastic Load Balancer ARN",
    ),
    (
        "lambda_arn",
        "AWS_LAMBDA_ARN",
        r"\barn:aws[a-z-]*:lambda:[a-z0-9-]+:\d{12}:function:[A-Za-z0-9_:-]*[A-Za-z0-9_]\b",
        None,
        "Lambda function ARN",
    ),
    (
        "arn",
        "AWS_ARN",
        r"\barn:aws[a-z-]*:[a-z0-9-]+:[a-z0-9-]*:\d{0,12}:[A-Za-z0-9+=,.@_/:-]*[A-Za-z0-9_]\b",
        None,
        "IAM and other resource ARNs",
    ),
    (
        "log_group",
        "AWS_LOG_GROUP",
        r"/aws/[A-Za-z0-9_-]+(?:[./][A-Za-z0-9_-]+)*",
        None,
        "CloudWatch log group under /aws/",
    ),
    (
        "access_key",
        "AWS_ACCESS_KEY",
        r"\b(?:AKIA|ASIA)[0-9A-Z]{16}\b",
        None,
        "Access key id",
    ),
    (
        "session_token",
        "AWS_SESSION_TOKEN",
        r"\b(?:FwoGZXIvYXdz|IQoJb3JpZ2luX2Vj)[A-Za-z0-9/+=]{16,}",
        None,
        "STS session token",
    ),
    (
        "ec2_instance",
        "AWS_EC2",
        r"\bi-(?:[0-9a-f]{17}|[0-9a-f]{8})\b",
        None,
        "EC2 instance id",
    ),
    (
        "ami",
        "AWS_AMI",
        r"\bami-(?:[0-9a-f]{17}|[0-9a-f]{8})\b",
        None,
        "Machine image id",
    ),
    (
        "vpc",
        "AWS_VPC",
        r"\bvpc-(?:[0-9a-f]{17}|[0-9a-f]{8})\b",
        None,
        "VPC id",
    ),
    (
        "subnet",
        "AWS_SUBNET",
        r"\bsubnet-(?:[0-9a-f]{17}|[0-9a-f]{8})\b",
        None,
        "Subnet id",
    ),
    (
        "security_group",
        "AWS_SECURITY_GROUP",
        r"\bsg-(?:[0-9a-f]{17}|[0-9a-f]{8})\b",
        None,
        "Security group id",
    ),
    (
        "ebs_volume",
        "AWS_EBS_VOL",
        r"\bvol-(?:[0-9a-f]{17}|[0-9a-f]{8})\b",
        None,
        "EBS volume id",
    ),
    (
        "snapshot",
        "AWS_SNAPSHOT",
        r"\bsnap-(?:[0-9a-f]{17}|[0-9a-f]{8})\b",
        None,
        "EBS snapshot id",
    ),
    (
        "internet_gateway",
        "AWS_IGW",
        r"\bigw-(?:[0-9a-f]{17}|[0-9a-f]{8})\b",
        None,
        "Internet gateway id",
    ),
    (
        "nat_gateway",
        "AWS_NAT_GW",
        r"\bnat-[0-9a-f]{17,40}\b",
        None,
        "NAT gateway id",
    ),
    (
        "vpn_connection",
        "AWS_VPN",
        r"\bvpn-(?:[0-9a-f]{17}|[0-9a-f]{8})\b",
        None,
        "VPN connection id",
    ),
    (
        "transit_gateway",
        "AWS_TGW",
        r"\btgw-[0-9a-f]{17}\b",
        None,
        "Transit gateway id",
    ),
    (
        "efs",
        "AWS_EFS",
        r"\bfs-(?:[0-9a-f]{17}|[0-9a-f]{8})\b",
        None,
        "EFS file system id",
    ),
    (
        "kms_key",
        "AWS_KMS_KEY",
        r"\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b",
        None,
        "KMS key id",
    ),
    (
        "route53_zone",
        "AWS_ROUTE53_ZONE",
        r"\bZ[A-Z]*[0-9][0-9A-Z]{7,30}\b",
        None,
        "Route 53 hosted zone id",
    ),
    (
        "public_ip",
        "AWS_PUBLIC_IP",
        r"\b(?:\d{1,3}\.){3}\d{1,3}\b",
        Some(Validator::PublicIpv4),
        "Public IPv4 address",
    ),
    (
        "ipv6",
        "AWS_IPV6",
        r"\b[0-9A-Fa-f]{1,4}(?::[0-9A-Fa-f]{0,4}){2,7}\b",
        Some(Validator::Ipv6),
        "Routable IPv6 address",
    ),
    (
        "account_id",
        "AWS_ACCOUNT",
        r"\b\d{12}\b",
        None,
        "Twelve digit account number",
    ),
    (
        "elasticache",
        "AWS_ELASTICACHE",
        r"\b(?:redis|memcached|valkey)(?:-[a-z0-9]+)+\b",
        None,
        "ElastiCache cluster name",
    ),
    (
        "s3_logs_bucket",
        "AWS_S3_LOGS_BUCKET",
        r"\b(?:(?:[a-z0-9]+-)+logs(?:-[a-z0-9]+)*|logs(?:-[a-z0-9]+)+)\b",
        None,
        "Hyphenated name with a `logs` segment",
    ),
    (
        "s3_bucket",
        "AWS_S3_BUCKET",
        r"\b(?:(?:[a-z0-9]+-)+bucket(?:-[a-z0-9]+)*|bucket(?:-[a-z0-9]+)+)\b",
        None,
        "Hyphenated name with a `bucket` segment",
    ),
    (
        "rds_instance",
        "AWS_RDS",
        r"\b(?:(?:[a-z0-9]+-)+db(?:-[a-z0-9]+)*|db(?:-[a-z0-9]+)+)\b",
        None,
        "Hyphenated name with a `db` segment",
    ),
];

/// The built-in rule table as specs
pub fn builtin_specs() -> Vec<PatternSpec> {
    BUILTIN
        .iter()
        .map(|(category, prefix, pattern, validator, description)| PatternSpec {
            category: category.to_string(),
            prefix: prefix.to_string(),
            pattern: pattern.to_string(),
            validator: *validator,
            description: description.to_string(),
        })
        .collect()
}

/// A compiled detection rule
#[derive(Debug, Clone)]
pub struct ResourcePattern {
    category: String,
    prefix: String,
    regex: Regex,
    validator: Option<Validator>,
    description: String,
}

impl ResourcePattern {
    /// Compile a rule from its definition
    pub fn compile(spec: &PatternSpec) -> Result<Self> {
        let regex = Regex::new(&spec.pattern).map_err(|e| {
            Error::pattern(format!(
                "Failed to compile pattern for '{}': {}",
                spec.category, e
            ))
        })?;

        Ok(Self {
            category: spec.category.clone(),
            prefix: spec.prefix.clone(),
            regex,
            validator: spec.validator,
            description: spec.description.clone(),
        })
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Whether a raw match passes this rule's validator
    pub fn accepts(&self, candidate: &str) -> bool {
        self.validator.map_or(true, |v| v.accepts(candidate))
    }
}

/// One accepted match within a text
#[derive(Debug, Clone, Copy)]
pub struct PatternMatch<'c, 't> {
    /// Rule that produced the match
    pub pattern: &'c ResourcePattern,
    /// Matched substring
    pub value: &'t str,
    /// Byte offset of the first matched byte
    pub start: usize,
    /// Byte offset one past the last matched byte
    pub end: usize,
}

impl PatternMatch<'_, '_> {
    pub fn category(&self) -> &str {
        self.pattern.category()
    }

    fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start < end && start < self.end
    }
}

/// Immutable, ordered registry of detection rules
#[derive(Debug, Clone)]
pub struct PatternCatalog {
    patterns: Vec<ResourcePattern>,
}

impl PatternCatalog {
    /// The built-in AWS catalog
    pub fn builtin() -> Result<Self> {
        Self::from_specs(&builtin_specs())
    }

    /// Built-in catalog adjusted by configuration: disabled categories are
    /// removed and custom patterns are appended with the lowest precedence.
    pub fn from_config(config: &MaskingConfig) -> Result<Self> {
        let mut specs = builtin_specs();

        for disabled in &config.disabled_categories {
            if !specs.iter().any(|s| &s.category == disabled) {
                warn!(category = %disabled, "Ignoring unknown category in disabled_categories");
            }
        }
        specs.retain(|s| !config.disabled_categories.contains(&s.category));
        specs.extend(config.custom_patterns.iter().cloned());

        Self::from_specs(&specs)
    }

    /// Build a catalog from specs, in the given precedence order
    pub fn from_specs(specs: &[PatternSpec]) -> Result<Self> {
        let token_prefix = Regex::new(r"^[A-Z][A-Z0-9]*(?:_[A-Z0-9]+)*$")
            .map_err(|e| Error::pattern(format!("Failed to compile prefix check: {}", e)))?;

        let mut categories = HashSet::new();
        let mut prefixes = HashSet::new();
        let mut patterns = Vec::with_capacity(specs.len());

        for spec in specs {
            if !categories.insert(spec.category.as_str()) {
                return Err(Error::pattern(format!(
                    "Duplicate category '{}'",
                    spec.category
                )));
            }
            if !prefixes.insert(spec.prefix.as_str()) {
                return Err(Error::pattern(format!(
                    "Prefix '{}' is used by more than one category",
                    spec.prefix
                )));
            }
            if !token_prefix.is_match(&spec.prefix) {
                return Err(Error::pattern(format!(
                    "Prefix '{}' must be upper-case words joined by underscores",
                    spec.prefix
                )));
            }
            patterns.push(ResourcePattern::compile(spec)?);
        }

        // A rule that matches tokens would re-mask its own output.
        for pattern in &patterns {
            for prefix in &prefixes {
                let sample = format!("{}_001", prefix);
                if pattern.regex.is_match(&sample) {
                    return Err(Error::pattern(format!(
                        "Pattern '{}' matches masked token '{}'",
                        pattern.category, sample
                    )));
                }
            }
        }

        debug!(patterns = patterns.len(), "Pattern catalog built");
        Ok(Self { patterns })
    }

    /// Scan `text` and return accepted, non-overlapping matches ordered by position
    pub fn find<'c, 't>(&'c self, text: &'t str) -> Vec<PatternMatch<'c, 't>> {
        let mut matches: Vec<PatternMatch<'c, 't>> = Vec::new();

        for pattern in &self.patterns {
            for m in pattern.regex.find_iter(text) {
                if !pattern.accepts(m.as_str()) {
                    continue;
                }
                if matches.iter().any(|c| c.overlaps(m.start(), m.end())) {
                    continue;
                }
                matches.push(PatternMatch {
                    pattern,
                    value: m.as_str(),
                    start: m.start(),
                    end: m.end(),
                });
            }
        }

        matches.sort_by_key(|m| m.start);
        matches
    }

    /// Look up a rule by category id
    pub fn get(&self, category: &str) -> Option<&ResourcePattern> {
        self.patterns.iter().find(|p| p.category == category)
    }

    /// Rules in precedence order
    pub fn patterns(&self) -> &[ResourcePattern] {
        &self.patterns
    }

    /// Category ids in precedence order
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|p| p.category.as_str())
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> PatternCatalog {
        PatternCatalog::builtin().unwrap()
    }

    fn categories_of(text: &str) -> Vec<(String, String)> {
        let catalog = catalog();
        catalog
            .find(text)
            .into_iter()
            .map(|m| (m.value.to_string(), m.category().to_string()))
            .collect()
    }

    #[test]
    fn test_builtin_catalog_compiles() {
        let catalog = catalog();
        assert_eq!(catalog.len(), BUILTIN.len());
        assert_eq!(catalog.get("ec2_instance").unwrap().prefix(), "AWS_EC2");
    }

    #[test]
    fn test_public_ip_validator() {
        for private in ["10.0.1.100", "172.16.0.50", "192.168.1.100", "127.0.0.1", "169.254.1.1"] {
            assert!(!is_public_ipv4(private), "{} should not be public", private);
        }
        for public in ["54.239.28.85", "8.8.8.8", "172.32.0.1"] {
            assert!(is_public_ipv4(public), "{} should be public", public);
        }
        assert!(!is_public_ipv4("0.1.2.3"));
        assert!(!is_public_ipv4("224.0.0.1"));
        assert!(!is_public_ipv4("999.1.1.1"));
    }

    #[test]
    fn test_ipv6_validator() {
        assert!(is_routable_ipv6("2001:db8::8a2e:370:7334"));
        assert!(is_routable_ipv6("fe80:0:0:0:202:b3ff:fe1e:8329"));
        assert!(!is_routable_ipv6("::1"));
        assert!(!is_routable_ipv6("0:0:0:0:0:0:0:0"));
        assert!(!is_routable_ipv6("12:30:45"));
        assert!(!is_routable_ipv6("00:1a:2b:3c:4d:5e"));
    }

    #[test]
    fn test_service_identifier_categories() {
        let cases = [
            ("nat-0123456789abcdef0", "nat_gateway"),
            ("nat-0123456789abcdef0123456789abcdef0", "nat_gateway"),
            ("vpn-0123456789abcdef0", "vpn_connection"),
            ("2001:db8::8a2e:370:7334", "ipv6"),
            ("FwoGZXIvYXdzEBaDOEXAMPLETOKEN123", "session_token"),
            ("12345678-1234-1234-1234-123456789012", "kms_key"),
            ("https://sqs.us-east-1.amazonaws.com/123456789012/MyQueue", "sqs_queue"),
            ("/aws/lambda/my-function", "log_group"),
            ("Z1234567890ABC", "route53_zone"),
            ("redis-cluster-001", "elasticache"),
            ("redis-cache-prod-001", "elasticache"),
        ];
        for (value, category) in cases {
            let text = format!("see {} now", value);
            let found = categories_of(&text);
            assert_eq!(
                found,
                vec![(value.to_string(), category.to_string())],
                "{} in {:?}",
                value,
                text
            );
        }
    }

    #[test]
    fn test_clock_times_are_not_addresses() {
        assert!(categories_of("started 12:30:45, finished 13:02:11").is_empty());
    }

    #[test]
    fn test_find_orders_by_position() {
        let found = categories_of("vpc-12345678 hosts i-1234567890abcdef0 behind 8.8.8.8");
        assert_eq!(
            found,
            vec![
                ("vpc-12345678".to_string(), "vpc".to_string()),
                ("i-1234567890abcdef0".to_string(), "ec2_instance".to_string()),
                ("8.8.8.8".to_string(), "public_ip".to_string()),
            ]
        );
    }

    #[test]
    fn test_validator_rejection_leaves_text() {
        assert!(categories_of("gateway at 10.0.1.100").is_empty());
    }

    #[test]
    fn test_arn_claims_embedded_account() {
        let found = categories_of("role arn:aws:iam::123456789012:role/AdminRole and 123456789012");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].0, "arn:aws:iam::123456789012:role/AdminRole");
        assert_eq!(found[0].1, "arn");
        assert_eq!(found[1].1, "account_id");
    }

    #[test]
    fn test_specific_arns_before_generic() {
        let found = categories_of(
            "arn:aws:lambda:us-east-1:123456789012:function:ProcessOrders \
             arn:aws:elasticloadbalancing:us-east-1:123456789012:loadbalancer/app/my-lb/50dc6c495c0c9188",
        );
        assert_eq!(found[0].1, "lambda_arn");
        assert_eq!(found[1].1, "elb_arn");
    }

    #[test]
    fn test_logs_takes_precedence_over_bucket() {
        let found = categories_of("bucket-prod-logs and data-bucket-prod and analytics-db");
        assert_eq!(found[0], ("bucket-prod-logs".to_string(), "s3_logs_bucket".to_string()));
        assert_eq!(found[1], ("data-bucket-prod".to_string(), "s3_bucket".to_string()));
        assert_eq!(found[2], ("analytics-db".to_string(), "rds_instance".to_string()));
    }

    #[test]
    fn test_plain_prose_is_not_matched() {
        assert!(categories_of("check the logs in the bucket and the db for feedback").is_empty());
    }

    #[test]
    fn test_tokens_are_never_matched() {
        let catalog = catalog();
        for pattern in catalog.patterns() {
            let token = format!("{}_001", pattern.prefix());
            assert!(catalog.find(&token).is_empty(), "{} matched", token);
        }
    }

    #[test]
    fn test_from_config_disables_and_extends() {
        let config = MaskingConfig {
            disabled_categories: vec!["rds_instance".to_string()],
            custom_patterns: vec![PatternSpec {
                category: "eks_cluster".to_string(),
                prefix: "AWS_EKS_CLUSTER".to_string(),
                pattern: r"\beks-[a-z0-9]{6}\b".to_string(),
                validator: None,
                description: String::new(),
            }],
        };

        let catalog = PatternCatalog::from_config(&config).unwrap();
        assert!(catalog.get("rds_instance").is_none());
        assert_eq!(catalog.categories().last(), Some("eks_cluster"));
        assert_eq!(catalog.find("cluster eks-a1b2c3 up").len(), 1);
    }

    #[test]
    fn test_rejects_duplicate_prefix() {
        let mut specs = builtin_specs();
        specs.push(PatternSpec {
            category: "second_ec2".to_string(),
            prefix: "AWS_EC2".to_string(),
            pattern: r"\bx-\d+\b".to_string(),
            validator: None,
            description: String::new(),
        });
        assert!(PatternCatalog::from_specs(&specs).is_err());
    }

    #[test]
    fn test_rejects_pattern_matching_tokens() {
        let specs = vec![PatternSpec {
            category: "greedy".to_string(),
            prefix: "GREEDY".to_string(),
            pattern: r"[A-Z_0-9]+".to_string(),
            validator: None,
            description: String::new(),
        }];
        assert!(matches!(
            PatternCatalog::from_specs(&specs),
            Err(Error::Pattern(_))
        ));
    }
}
