//! Command lines for the classic rootfs tools.

use super::{ImageDefinition, Ppa};
use crate::process::Cmd;
use std::path::Path;

/// `germinate` resolving the definition's seeds, run from its output dir.
pub fn generate_germinate_cmd(def: &ImageDefinition, output_dir: &Path) -> Cmd {
    let seed = &def.rootfs.seed;
    Cmd::new("germinate")
        .args(["--mirror", def.rootfs.mirror.as_str()])
        .args(["--arch", def.arch().as_str()])
        .args(["--dist", def.series.as_str()])
        .args(["--seed-source", seed.urls.join(",").as_str()])
        .args([
            "--seed-dist".to_string(),
            format!("{}.{}", def.rootfs.flavor, seed.branch),
        ])
        .arg("--no-rdepends")
        .arg(format!("--components={}", def.rootfs.components.join(",")))
        .current_dir(output_dir)
        .error_msg("Error running germinate command")
}

/// Package names from germinate seed output.
///
/// Package rows start with a lowercase letter or digit; the name is the
/// first column. Header and separator rows are skipped.
pub fn parse_seed_packages(seed_output: &str) -> Vec<String> {
    seed_output
        .lines()
        .filter(|line| {
            line.bytes()
                .next()
                .is_some_and(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        })
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// `debootstrap` creating a minimal chroot at `chroot`.
pub fn generate_debootstrap_cmd(def: &ImageDefinition, chroot: &Path) -> Cmd {
    Cmd::new("debootstrap")
        .arg(format!("--arch={}", def.arch()))
        .arg("--variant=minbase")
        .arg(format!("--components={}", def.rootfs.components.join(",")))
        .arg(&def.series)
        .arg_path(chroot)
        .arg(&def.rootfs.mirror)
        .error_msg("Error running debootstrap command")
}

pub fn generate_apt_update_cmd(chroot: &Path) -> Cmd {
    Cmd::new("chroot")
        .arg_path(chroot)
        .args(["apt", "update"])
        .error_msg("Error running apt update")
}

/// `apt install` of `packages` inside `chroot`.
pub fn generate_apt_cmd(chroot: &Path, packages: &[String]) -> Cmd {
    Cmd::new("chroot")
        .arg_path(chroot)
        .args(["apt", "install", "-y"])
        .args(packages)
        .env("DEBIAN_FRONTEND", "noninteractive")
        .error_msg("Error running apt install")
}

/// `dpkg-query` listing installed packages with versions.
pub fn generate_package_manifest_cmd(rootfs: &Path) -> Cmd {
    Cmd::new("chroot")
        .arg_path(rootfs)
        .args(["dpkg-query", "-W", "--showformat=${binary:Package} ${Version}\n"])
        .error_msg("Error generating package manifest")
}

/// Sources list file name and content for `ppa` on `series`.
pub fn create_ppa_info(ppa: &Ppa, series: &str) -> (String, String) {
    let (owner, name) = ppa.name.split_once('/').unwrap_or((ppa.name.as_str(), ""));
    let file_name = format!("{}-ubuntu-{}-{}.list", owner, name, series);
    let host = match &ppa.auth {
        Some(auth) => format!("{}@private-ppa.launchpadcontent.net", auth),
        None => "ppa.launchpadcontent.net".to_string(),
    };
    let contents = format!(
        "deb https://{}/{}/{}/ubuntu {} main",
        host, owner, name, series
    );
    (file_name, contents)
}
