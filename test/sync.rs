// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::ProjectFixture;

use anyhow::Result;
use hoist::{HoistConfig, ResourceSync};
use pretty_assertions::assert_eq;
use std::fs;

#[test]
fn configured_sync_fills_static_subpath() -> Result<()> {
    let fixture = ProjectFixture::new()?;
    fixture.write_project_file("client/build/index.html", "<html/>")?;
    fixture.write_project_file("client/build/app.js.map", "map")?;
    fixture.write_project_file("server/resources/static/stale.js", "stale")?;

    let config: HoistConfig = format!(
        r#"
            [sync]
            source = '{}/client/build'
            destination = '{}/server/resources'
            exclude = ["*.map"]
        "#,
        fixture.project().display(),
        fixture.project().display(),
    )
    .parse()?;

    let sync = ResourceSync::from_settings(config.sync_settings()?)?;
    let first = sync.run()?;
    let second = sync.run()?;

    let target = fixture.project().join("server/resources/static");
    assert_eq!(first.copied.len(), 1);
    assert_eq!(first.removed.len(), 1);
    assert!(second.is_noop());
    assert_eq!(fs::read_to_string(target.join("index.html"))?, "<html/>");
    assert!(!target.join("stale.js").exists());
    assert!(!target.join("app.js.map").exists());

    Ok(())
}
