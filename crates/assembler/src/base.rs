//! Machinery shared by every dialect: entry naming, collision
//! remediation, and lenient access to the submission's metadata blob.

use deposit_config::{AssemblySpec, Archive, Compression};
use deposit_package::{EntryContent, PackageEntry};
use deposit_types::{FileDescriptor, FileSource, Submission};

/// Prefix applied to user files whose names collide with generated
/// control documents. User files never shadow control files.
pub const REMEDIATION_PREFIX: &str = "user-";

/// File name for the emitted package, derived from the dialect prefix,
/// the submission id, and the container/compression choice.
pub fn package_file_name(prefix: &str, submission: &Submission, spec: &AssemblySpec) -> String {
    let extension = match (spec.archive, spec.compression) {
        (Archive::Zip, Compression::None) => "zip",
        (Archive::Zip, Compression::Gzip) => "zip.gz",
        (Archive::Tar, Compression::None) => "tar",
        (Archive::Tar, Compression::Gzip) => "tar.gz",
    };
    format!("{prefix}-{}.{extension}", submission.id())
}

/// Renames any custodial file that collides with a reserved control-file
/// name by prefixing it, repeatedly if the prefixed name still collides.
/// Returns (entry name, descriptor) pairs in declared order.
pub fn remediate_collisions<'a>(
    files: &'a [FileDescriptor],
    reserved: &[&str],
) -> Vec<(String, &'a FileDescriptor)> {
    let mut taken: Vec<String> = reserved.iter().map(|s| (*s).to_owned()).collect();
    files
        .iter()
        .map(|file| {
            let mut name = file.name().to_owned();
            while taken.iter().any(|t| t == &name) {
                name = format!("{REMEDIATION_PREFIX}{name}");
            }
            taken.push(name.clone());
            (name, file)
        })
        .collect()
}

/// Converts a remediated custodial file into a package entry.
pub(crate) fn custodial_entry(name: String, file: &FileDescriptor) -> PackageEntry {
    let content = match file.source() {
        FileSource::Inline(bytes) => EntryContent::Bytes(bytes.clone()),
        FileSource::Path(path) => EntryContent::File(path.clone()),
    };
    PackageEntry::new(name, file.mime_type(), content)
}

/// Lenient view over the opaque metadata blob. Dialects render whatever
/// is present and omit what is not.
pub(crate) struct SubmissionMeta<'a> {
    blob: &'a serde_json::Value,
}

impl<'a> SubmissionMeta<'a> {
    pub(crate) fn of(submission: &'a Submission) -> Self {
        Self {
            blob: submission.metadata(),
        }
    }

    pub(crate) fn title(&self) -> Option<&str> {
        self.blob.get("title").and_then(|v| v.as_str())
    }

    pub(crate) fn doi(&self) -> Option<&str> {
        self.blob.get("doi").and_then(|v| v.as_str())
    }

    pub(crate) fn journal(&self) -> Option<&str> {
        self.blob.get("journal").and_then(|v| v.as_str())
    }

    pub(crate) fn abstract_text(&self) -> Option<&str> {
        self.blob.get("abstract").and_then(|v| v.as_str())
    }

    pub(crate) fn authors(&self) -> Vec<&str> {
        self.blob
            .get("authors")
            .and_then(|v| v.as_array())
            .map(|authors| {
                authors
                    .iter()
                    .filter_map(|a| {
                        a.as_str()
                            .or_else(|| a.get("name").and_then(|n| n.as_str()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use deposit_types::{RepositoryId, SubmissionId};

    use super::*;

    fn file(name: &str) -> FileDescriptor {
        FileDescriptor::new(name, "application/pdf", FileSource::Inline(vec![1, 2]))
    }

    #[test]
    fn collisions_are_prefixed_until_unique() {
        let files = vec![
            file("article.pdf"),
            file("manifest.txt"),
            file("user-manifest.txt"),
        ];
        let remediated = remediate_collisions(&files, &["manifest.txt", "bulk_meta.xml"]);
        let names: Vec<&str> = remediated.iter().map(|(n, _)| n.as_str()).collect();
        // "manifest.txt" collides with the reserved name and takes the
        // prefixed slot; the user's own "user-manifest.txt" then has to
        // dodge it.
        assert_eq!(
            names,
            ["article.pdf", "user-manifest.txt", "user-user-manifest.txt"]
        );
    }

    #[test]
    fn declared_order_is_preserved() {
        let files = vec![file("b.pdf"), file("a.pdf"), file("c.pdf")];
        let remediated = remediate_collisions(&files, &["manifest.txt"]);
        let names: Vec<&str> = remediated.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["b.pdf", "a.pdf", "c.pdf"]);
    }

    #[test]
    fn metadata_access_is_lenient() {
        let mut submission = Submission::new(SubmissionId::new("s1"), vec![RepositoryId::new("r1")]);
        submission.set_metadata(serde_json::json!({
            "title": "On Deposits",
            "authors": [{"name": "A. Author"}, "B. Author"],
        }));
        let meta = SubmissionMeta::of(&submission);
        assert_eq!(meta.title(), Some("On Deposits"));
        assert_eq!(meta.authors(), ["A. Author", "B. Author"]);
        assert_eq!(meta.doi(), None);
        assert!(meta.journal().is_none());
        assert!(meta.abstract_text().is_none());
    }
}
