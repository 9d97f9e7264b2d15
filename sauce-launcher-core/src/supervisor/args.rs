//! Command line for the tunnel binary.

use std::path::Path;

use crate::config::{Credentials, TunnelOptions};

/// Builds the argument list, in the order the binary documents them.
///
/// `--readyfile` is always last.
pub fn build_args(options: &TunnelOptions, credentials: &Credentials, readyfile: &Path) -> Vec<String> {
    let mut args = vec![
        "-u".to_string(),
        credentials.username.clone(),
        "-k".to_string(),
        credentials.access_key.clone(),
    ];

    if let Some(port) = options.port {
        args.push("-P".to_string());
        args.push(port.to_string());
    }

    if let Some(proxy) = &options.proxy {
        args.push("--proxy".to_string());
        args.push(proxy.clone());
    }

    if let Some(domains) = &options.direct_domains {
        args.push("--direct-domains".to_string());
        args.push(domains.to_string());
    }

    if let Some(patterns) = &options.fast_fail_regexps {
        args.push("--fast-fail-regexps".to_string());
        args.push(patterns.to_string());
    }

    if let Some(logfile) = &options.logfile {
        args.push("-l".to_string());
        args.push(logfile.display().to_string());
    }

    if let Some(identifier) = &options.tunnel_identifier {
        args.push("--tunnel-identifier".to_string());
        args.push(identifier.clone());
    }

    args.push("--readyfile".to_string());
    args.push(readyfile.display().to_string());

    args
}

/// The argument list joined for logging, with the value after `-k` masked.
pub fn display_args(args: &[String]) -> String {
    let mut masked = false;
    args.iter()
        .map(|arg| {
            let shown = if masked { "****" } else { arg.as_str() };
            masked = arg == "-k";
            shown
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CsvList;
    use std::path::PathBuf;

    fn creds() -> Credentials {
        Credentials {
            username: "u".into(),
            access_key: "k".into(),
        }
    }

    #[test]
    fn test_minimal_args() {
        let args = build_args(&TunnelOptions::default(), &creds(), Path::new("/tmp/ready"));
        assert_eq!(args, ["-u", "u", "-k", "k", "--readyfile", "/tmp/ready"]);
    }

    #[test]
    fn test_port_and_readyfile_last() {
        let options = TunnelOptions {
            port: Some(4445),
            ..Default::default()
        };
        let args = build_args(&options, &creds(), Path::new("/tmp/ready"));
        assert_eq!(
            args,
            ["-u", "u", "-k", "k", "-P", "4445", "--readyfile", "/tmp/ready"]
        );
    }

    #[test]
    fn test_full_args_in_order() {
        let options = TunnelOptions {
            port: Some(4445),
            proxy: Some("proxy.local:8080".into()),
            direct_domains: Some(["a.com", "b.com"].into_iter().collect()),
            fast_fail_regexps: Some(CsvList::from("ads")),
            logfile: Some(PathBuf::from("/tmp/sc.log")),
            tunnel_identifier: Some("ci-7".into()),
            ..Default::default()
        };
        let args = build_args(&options, &creds(), Path::new("/tmp/ready"));
        assert_eq!(
            args,
            [
                "-u",
                "u",
                "-k",
                "k",
                "-P",
                "4445",
                "--proxy",
                "proxy.local:8080",
                "--direct-domains",
                "a.com,b.com",
                "--fast-fail-regexps",
                "ads",
                "-l",
                "/tmp/sc.log",
                "--tunnel-identifier",
                "ci-7",
                "--readyfile",
                "/tmp/ready",
            ]
        );
    }

    #[test]
    fn test_display_masks_access_key() {
        let credentials = Credentials {
            username: "user".into(),
            access_key: "secret".into(),
        };
        let args = build_args(&TunnelOptions::default(), &credentials, Path::new("/r"));
        let shown = display_args(&args);
        assert_eq!(shown, "-u user -k **** --readyfile /r");
    }

    #[test]
    fn test_display_masks_only_key_position() {
        let credentials = Credentials {
            username: "4445".into(),
            access_key: "4445".into(),
        };
        let options = TunnelOptions {
            port: Some(4445),
            ..Default::default()
        };
        let args = build_args(&options, &credentials, Path::new("/r"));
        assert_eq!(
            display_args(&args),
            "-u 4445 -k **** -P 4445 --readyfile /r"
        );
    }
}
