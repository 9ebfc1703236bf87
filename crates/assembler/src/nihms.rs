//! NIHMS bulk-submission packaging.
//!
//! Layout: `manifest.txt` first, `bulk_meta.xml` second, custodial files
//! after, in declared order. The manifest lists one custodial file per
//! line; the metadata document renders the bibliographic blob.

use std::io::Cursor;

use deposit_config::AssemblySpec;
use deposit_package::{EntryContent, PackageEntry, PackageStream};
use deposit_types::Submission;
use quick_xml::{
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
    Writer,
};

use crate::{
    base::{custodial_entry, package_file_name, remediate_collisions, SubmissionMeta},
    Assembler, AssemblerError,
};

/// Packaging-spec identifier for NIHMS bulk submissions.
pub const NIHMS_SPEC_URI: &str = "nihms-native-2017-07";

const MANIFEST_NAME: &str = "manifest.txt";
const META_NAME: &str = "bulk_meta.xml";

/// Assembler for the NIHMS bulk-submission dialect.
#[derive(Debug, Default)]
pub struct NihmsAssembler;

impl Assembler for NihmsAssembler {
    fn spec_uri(&self) -> &str {
        NIHMS_SPEC_URI
    }

    fn assemble(
        &self,
        submission: &Submission,
        spec: &AssemblySpec,
    ) -> Result<PackageStream, AssemblerError> {
        if submission.files().is_empty() {
            return Err(AssemblerError::NoCustodialFiles(
                submission.id().to_string(),
            ));
        }

        let remediated = remediate_collisions(submission.files(), &[MANIFEST_NAME, META_NAME]);

        let mut manifest = String::new();
        for (name, file) in &remediated {
            manifest.push_str(&format!("file\t{}\t{name}\n", file.mime_type()));
        }

        let meta = render_bulk_meta(submission, &remediated)?;

        let mut entries = vec![
            PackageEntry::new(
                MANIFEST_NAME,
                "text/plain",
                EntryContent::Bytes(manifest.into_bytes()),
            ),
            PackageEntry::new(META_NAME, "application/xml", EntryContent::Bytes(meta)),
        ];
        entries.extend(
            remediated
                .into_iter()
                .map(|(name, file)| custodial_entry(name, file)),
        );

        let name = package_file_name("nihms", submission, spec);
        Ok(PackageStream::new(name, spec, entries))
    }
}

fn render_bulk_meta(
    submission: &Submission,
    files: &[(String, &deposit_types::FileDescriptor)],
) -> Result<Vec<u8>, AssemblerError> {
    let wrap = |source| AssemblerError::MetadataDocument {
        document: META_NAME,
        source,
    };

    let mut w = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(wrap)?;

    let mut root = BytesStart::new("nihms-submission");
    root.push_attribute(("submission-id", submission.id().as_str()));
    w.write_event(Event::Start(root)).map_err(wrap)?;

    let meta = SubmissionMeta::of(submission);
    w.write_event(Event::Start(BytesStart::new("metadata")))
        .map_err(wrap)?;
    for (element, value) in [
        ("title", meta.title()),
        ("journal", meta.journal()),
        ("doi", meta.doi()),
        ("abstract", meta.abstract_text()),
    ] {
        if let Some(value) = value {
            write_text_element(&mut w, element, value).map_err(wrap)?;
        }
    }
    let authors = meta.authors();
    if !authors.is_empty() {
        w.write_event(Event::Start(BytesStart::new("authors")))
            .map_err(wrap)?;
        for author in authors {
            write_text_element(&mut w, "author", author).map_err(wrap)?;
        }
        w.write_event(Event::End(BytesEnd::new("authors")))
            .map_err(wrap)?;
    }
    w.write_event(Event::End(BytesEnd::new("metadata")))
        .map_err(wrap)?;

    w.write_event(Event::Start(BytesStart::new("files")))
        .map_err(wrap)?;
    for (name, file) in files {
        let mut el = BytesStart::new("file");
        el.push_attribute(("name", name.as_str()));
        el.push_attribute(("mime-type", file.mime_type()));
        w.write_event(Event::Empty(el)).map_err(wrap)?;
    }
    w.write_event(Event::End(BytesEnd::new("files")))
        .map_err(wrap)?;

    w.write_event(Event::End(BytesEnd::new("nihms-submission")))
        .map_err(wrap)?;

    Ok(w.into_inner().into_inner())
}

fn write_text_element<W: std::io::Write>(
    w: &mut Writer<W>,
    element: &str,
    text: &str,
) -> Result<(), quick_xml::Error> {
    w.write_event(Event::Start(BytesStart::new(element)))?;
    w.write_event(Event::Text(BytesText::new(text)))?;
    w.write_event(Event::End(BytesEnd::new(element)))?;
    Ok(())
}
