//! Cloud-init user-data that runs the game image under Docker.
//!
//! Scaleway exposes instance user-data as a per-server key/value store. When
//! the key is set to `cloud-init`, the value is consumed by cloud-init on the
//! instance's first boot, which is why instances are powered on only after
//! the payload is stored.

use std::borrow::Cow;
use std::collections::BTreeMap;

use shell_escape::unix::escape;

/// Reserved user-data key that Scaleway recognises for cloud-init payloads.
pub(super) const CLOUD_INIT_USER_DATA_KEY: &str = "cloud-init";

const CONTAINER_NAME: &str = "quickserver";

/// Renders a boot script that installs Docker when missing and starts
/// `image` on the host network with `environment`.
///
/// Every value is shell-quoted; environment entries are passed as single
/// `KEY=value` words.
#[must_use]
pub fn render_user_data(image: &str, environment: &BTreeMap<String, String>) -> String {
    let quoted_image = escape(Cow::Borrowed(image));
    let mut script = String::from(
        "#!/bin/sh\n\
         set -eu\n\
         if ! command -v docker >/dev/null 2>&1; then\n\
         \x20 apt-get update\n\
         \x20 apt-get install -y docker.io\n\
         fi\n",
    );
    script.push_str(&format!("docker pull {quoted_image}\n"));
    script.push_str(&format!(
        "docker run -d --name {CONTAINER_NAME} --restart unless-stopped --network host \\\n"
    ));
    for (key, value) in environment {
        let entry = format!("{key}={value}");
        script.push_str(&format!("  -e {} \\\n", escape(Cow::Owned(entry))));
    }
    script.push_str(&format!("  {quoted_image}\n"));
    script
}
