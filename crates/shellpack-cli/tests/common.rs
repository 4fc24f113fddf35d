#![allow(dead_code)]

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use assert_cmd::assert::Assert;
use serde_json::Value;
use tempfile::TempDir;
use zip::write::FileOptions;

pub const SHELL_ICON: &[u8] = b"shell icon";
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

pub const MANIFEST: &str = r#"<manifest xmlns:android="http://schemas.android.com/apk/res/android">
    <application>
        <activity android:name=".MainActivity">
            <intent-filter>
                <action android:name="android.intent.action.MAIN" />
                <category android:name="android.intent.category.LAUNCHER" />
            </intent-filter>
            <intent-filter>
                <action android:name="android.intent.action.VIEW" />
                <data android:scheme="https" />
            </intent-filter>
        </activity>
    </application>
</manifest>
"#;

/// Shell template with the default layout.
pub struct ShellFixture {
    pub temp: TempDir,
    pub root: PathBuf,
}

impl ShellFixture {
    pub fn new(prefix: &str) -> Self {
        let temp = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .expect("tempdir");
        let root = temp.path().join("shell");
        fs::create_dir_all(root.join("src/main/res/drawable")).expect("shell dirs");
        fs::write(root.join("src/main/res/drawable/ic_launcher.png"), SHELL_ICON).expect("icon");
        fs::write(root.join("src/main/AndroidManifest.xml"), MANIFEST).expect("manifest");
        Self { temp, root }
    }

    pub fn icon(&self) -> PathBuf {
        self.root.join("src/main/res/drawable/ic_launcher.png")
    }

    pub fn manifest(&self) -> PathBuf {
        self.root.join("src/main/AndroidManifest.xml")
    }

    pub fn injected(&self, project_id: &str) -> PathBuf {
        self.root.join("src/main/assets").join(format!("{project_id}.zip"))
    }
}

pub fn png(tag: &[u8]) -> Vec<u8> {
    let mut bytes = PNG_SIGNATURE.to_vec();
    bytes.extend_from_slice(tag);
    bytes
}

pub fn program_archive(name: &str, screenshot: Option<&[u8]>) -> Vec<u8> {
    let mut buffer = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buffer);
        let options = FileOptions::default();
        zip.start_file("code.xml", options).expect("start code.xml");
        write!(
            zip,
            "<program><header><programName>{name}</programName></header></program>"
        )
        .expect("write code.xml");
        if let Some(bytes) = screenshot {
            zip.start_file("manual_screenshot.png", options)
                .expect("start screenshot");
            zip.write_all(bytes).expect("write screenshot");
        }
        zip.finish().expect("finish archive");
    }
    buffer.into_inner()
}

pub fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("parent dirs");
    }
    let mut file = File::create(path).expect("create file");
    file.write_all(bytes).expect("write file");
}

pub fn parse_json(assert: &Assert) -> Value {
    serde_json::from_slice(&assert.get_output().stdout).expect("valid json")
}
