//! The per-filesystem-family mount option tables (§6) and the allowlist
//! validator every mount-family operation runs user-supplied options
//! through.

use crate::error::OpError;

/// One filesystem family's option policy.
struct FamilyOptions {
    family: &'static str,
    defaults: &'static [&'static str],
    allow: &'static [&'static str],
    allow_uid_self: &'static [&'static str],
    allow_gid_self: &'static [&'static str],
}

const ANY: &[&str] = &[
    "exec", "noexec", "nodev", "nosuid", "atime", "noatime", "nodiratime", "ro", "rw", "sync", "dirsync",
];

const FAMILIES: &[FamilyOptions] = &[
    FamilyOptions {
        family: "vfat",
        defaults: &["uid=", "gid=", "shortname=mixed", "dmask=0077", "utf8=1"],
        allow: &[
            "flush", "utf8=", "shortname=", "umask=", "dmask=", "fmask=", "codepage=", "iocharset=", "usefree",
        ],
        allow_uid_self: &["uid="],
        allow_gid_self: &["gid="],
    },
    FamilyOptions {
        family: "ntfs",
        defaults: &["uid=", "gid=", "dmask=0077"],
        allow: &["umask=", "dmask=", "fmask="],
        allow_uid_self: &["uid="],
        allow_gid_self: &["gid="],
    },
    FamilyOptions {
        family: "iso9660",
        defaults: &["uid=", "gid=", "iocharset=utf8", "mode=0400", "dmode=0500"],
        allow: &["norock", "nojoliet", "iocharset=", "mode=", "dmode="],
        allow_uid_self: &["uid="],
        allow_gid_self: &["gid="],
    },
    FamilyOptions {
        family: "udf",
        defaults: &["uid=", "gid=", "iocharset=utf8", "umask=0077"],
        allow: &["iocharset=", "umask="],
        allow_uid_self: &["uid="],
        allow_gid_self: &["gid="],
    },
];

fn family(fstype: &str) -> Option<&'static FamilyOptions> {
    FAMILIES.iter().find(|f| f.family == fstype)
}

/// The option's `key=`/bare-flag prefix, used for allowlist matching:
/// `"uid=1000"` matches the allowlist entry `"uid="`, `"ro"` matches `"ro"`.
fn option_key(option: &str) -> &str {
    match option.split_once('=') {
        Some((key, _)) => {
            // Keep the trailing '=' so `"uid=1000"` matches the `"uid="`
            // table entries rather than a bare `"uid"`.
            &option[..key.len() + 1]
        }
        None => option,
    }
}

/// Default options for `fstype`, plus the mandatory `nodev,nosuid` (§4.12
/// Mount). Unknown filesystem families get only the universal safety
/// options.
pub fn default_options(fstype: &str) -> Vec<String> {
    let mut opts: Vec<String> = family(fstype).map(|f| f.defaults.iter().map(|s| s.to_string()).collect()).unwrap_or_default();
    opts.push("nodev".to_string());
    opts.push("nosuid".to_string());
    opts
}

/// Validate `options` against the allowlist for `fstype`, given the
/// caller's uid/gid for the `allow-*-self` exemptions. Rejects commas
/// inside a single option (§4.12) and any option outside the allowlist.
pub fn validate_options(fstype: &str, options: &[String], caller_uid: u32, caller_gid: u32) -> Result<(), OpError> {
    let f = family(fstype);
    for opt in options {
        if opt.contains(',') {
            return Err(OpError::InvalidOption(format!("comma not allowed inside option {opt:?}")));
        }
        let key = option_key(opt);
        let is_any_allowed = ANY.contains(&opt.as_str()) || ANY.contains(&key);
        let is_family_allowed = f.map(|f| f.allow.contains(&key)).unwrap_or(false);
        let is_uid_self = f
            .map(|f| f.allow_uid_self.contains(&key) && opt == &format!("{key}{caller_uid}"))
            .unwrap_or(false);
        let is_gid_self = f
            .map(|f| f.allow_gid_self.contains(&key) && opt == &format!("{key}{caller_gid}"))
            .unwrap_or(false);
        if !(is_any_allowed || is_family_allowed || is_uid_self || is_gid_self) {
            return Err(OpError::InvalidOption(opt.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_for_vfat() {
        let opts = default_options("vfat");
        assert!(opts.contains(&"shortname=mixed".to_string()));
        assert!(opts.contains(&"nodev".to_string()));
        assert!(opts.contains(&"nosuid".to_string()));
    }

    #[test]
    fn test_any_family_options_always_allowed() {
        assert!(validate_options("vfat", &["ro".to_string()], 1000, 1000).is_ok());
        assert!(validate_options("ext4", &["sync".to_string()], 1000, 1000).is_ok());
    }

    #[test]
    fn test_uid_self_exemption() {
        assert!(validate_options("vfat", &["uid=1000".to_string()], 1000, 1000).is_ok());
        assert!(validate_options("vfat", &["uid=0".to_string()], 1000, 1000).is_err());
    }

    #[test]
    fn test_comma_in_option_rejected() {
        let err = validate_options("vfat", &["utf8=1,ro".to_string()], 1000, 1000).unwrap_err();
        assert!(matches!(err, OpError::InvalidOption(_)));
    }

    #[test]
    fn test_unknown_option_rejected() {
        let err = validate_options("vfat", &["exec_other_stuff".to_string()], 1000, 1000).unwrap_err();
        assert!(matches!(err, OpError::InvalidOption(_)));
    }
}
