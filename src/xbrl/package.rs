use std::{collections::HashMap, io::Cursor, io::Read};

use zip::ZipArchive;

use crate::error::{Error, Result};

/// 解開後的 XBRL 申報檔包。
///
/// MOPS 下載的 ZIP 內含一份 iXBRL instance 與成套的 taxonomy 連結庫，
/// 檔名慣例：`tifrs-fr*-ci-*.html` 為 instance，`*_cal.xml`、`*_pre.xml`、
/// `*_lab.xml` 分別為計算、表達與標籤連結庫。
#[derive(Debug)]
pub struct ReportPackage {
    files: HashMap<String, Vec<u8>>,
    instance_path: String,
}

impl ReportPackage {
    pub fn from_bytes(bytes: &[u8]) -> Result<ReportPackage> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut files = HashMap::with_capacity(archive.len());

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }

            let name = entry.name().to_string();
            let mut content = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut content)?;
            files.insert(name, content);
        }

        let instance_path = detect_instance(&files).ok_or_else(|| {
            Error::MalformedPackage("no XBRL instance file in archive".to_string())
        })?;

        Ok(ReportPackage {
            files,
            instance_path,
        })
    }

    pub fn instance_path(&self) -> &str {
        &self.instance_path
    }

    pub fn instance(&self) -> &[u8] {
        &self.files[&self.instance_path]
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(|v| v.as_slice())
    }

    pub fn calculation_linkbases(&self) -> Vec<&[u8]> {
        self.linkbases_with_suffix("_cal.xml")
    }

    pub fn presentation_linkbases(&self) -> Vec<&[u8]> {
        self.linkbases_with_suffix("_pre.xml")
    }

    pub fn label_linkbases(&self) -> Vec<&[u8]> {
        self.linkbases_with_suffix("_lab.xml")
    }

    fn linkbases_with_suffix(&self, suffix: &str) -> Vec<&[u8]> {
        let mut names: Vec<&String> = self
            .files
            .keys()
            .filter(|name| basename(name).ends_with(suffix))
            .collect();
        names.sort();
        names
            .into_iter()
            .map(|name| self.files[name].as_slice())
            .collect()
    }
}

/// instance 偵測順序：tifrs-fr*-ci-*.htm[l] 檔名、含 xbrli:xbrl 根的 .xml、
/// 最大的 .htm 檔。
fn detect_instance(files: &HashMap<String, Vec<u8>>) -> Option<String> {
    let mut names: Vec<&String> = files.keys().collect();
    names.sort();

    for name in &names {
        let base = basename(name);
        if base.starts_with("tifrs-fr")
            && base.contains("-ci-")
            && (base.ends_with(".htm") || base.ends_with(".html"))
        {
            return Some((*name).clone());
        }
    }

    for name in &names {
        if basename(name).ends_with(".xml") {
            let head_len = files[*name].len().min(4096);
            let head = String::from_utf8_lossy(&files[*name][..head_len]);
            if head.contains("<xbrli:xbrl") || head.contains("<xbrl ") {
                return Some((*name).clone());
            }
        }
    }

    names
        .iter()
        .filter(|name| {
            let base = basename(name);
            base.ends_with(".htm") || base.ends_with(".html")
        })
        .max_by_key(|name| files[**name].len())
        .map(|name| (*name).clone())
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_detect_ixbrl_instance() {
        let bytes = build_zip(&[
            ("tifrs-fr1-m1-ci-cr-2330-2024Q3.html", b"<html></html>"),
            ("tifrs-bsci-cr-2024-09-30_cal.xml", b"<linkbase/>"),
            ("tifrs-bsci-cr-2024-09-30_pre.xml", b"<linkbase/>"),
            ("tifrs-bsci-cr-2024-09-30_lab.xml", b"<linkbase/>"),
        ]);

        let package = ReportPackage::from_bytes(&bytes).unwrap();
        assert_eq!(
            package.instance_path(),
            "tifrs-fr1-m1-ci-cr-2330-2024Q3.html"
        );
        assert_eq!(package.calculation_linkbases().len(), 1);
        assert_eq!(package.presentation_linkbases().len(), 1);
        assert_eq!(package.label_linkbases().len(), 1);
    }

    #[test]
    fn test_detect_xml_instance() {
        let bytes = build_zip(&[
            ("report.xml", b"<?xml version=\"1.0\"?><xbrli:xbrl></xbrli:xbrl>"),
            ("other.xml", b"<linkbase/>"),
        ]);

        let package = ReportPackage::from_bytes(&bytes).unwrap();
        assert_eq!(package.instance_path(), "report.xml");
    }

    #[test]
    fn test_fallback_to_largest_htm() {
        let bytes = build_zip(&[
            ("small.htm", b"<html/>"),
            ("big.htm", b"<html><body>lots of content here</body></html>"),
        ]);

        let package = ReportPackage::from_bytes(&bytes).unwrap();
        assert_eq!(package.instance_path(), "big.htm");
    }

    #[test]
    fn test_no_instance_is_malformed() {
        let bytes = build_zip(&[("readme.txt", b"nothing here")]);

        match ReportPackage::from_bytes(&bytes) {
            Err(Error::MalformedPackage(_)) => {}
            other => panic!("expected MalformedPackage, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_malformed() {
        match ReportPackage::from_bytes(b"this is not a zip") {
            Err(Error::MalformedPackage(_)) => {}
            other => panic!("expected MalformedPackage, got {:?}", other),
        }
    }
}
