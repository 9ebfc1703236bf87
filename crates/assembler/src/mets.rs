//! DSpace METS SIP packaging.
//!
//! Layout: `mets.xml` first, custodial files after, in declared order.
//! The METS document carries a descriptive section rendered from the
//! metadata blob and a file section referencing every custodial entry.

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

/// Packaging-spec identifier for DSpace METS SIPs.
pub const METS_SPEC_URI: &str = "http://purl.org/net/sword/package/METSDSpaceSIP";

const METS_NAME: &str = "mets.xml";
const METS_NS: &str = "http://www.loc.gov/METS/";
const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

/// Assembler for DSpace METS SIPs.
#[derive(Debug, Default)]
pub struct DspaceMetsAssembler;

impl Assembler for DspaceMetsAssembler {
    fn spec_uri(&self) -> &str {
        METS_SPEC_URI
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

        let remediated = remediate_collisions(submission.files(), &[METS_NAME]);
        let mets = render_mets(submission, &remediated)?;

        let mut entries = vec![PackageEntry::new(
            METS_NAME,
            "application/xml",
            EntryContent::Bytes(mets),
        )];
        entries.extend(
            remediated
                .into_iter()
                .map(|(name, file)| custodial_entry(name, file)),
        );

        let name = package_file_name("dspace-mets", submission, spec);
        Ok(PackageStream::new(name, spec, entries))
    }
}

fn render_mets(
    submission: &Submission,
    files: &[(String, &deposit_types::FileDescriptor)],
) -> Result<Vec<u8>, AssemblerError> {
    let wrap = |source| AssemblerError::MetadataDocument {
        document: METS_NAME,
        source,
    };

    let mut w = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(wrap)?;

    let mut root = BytesStart::new("mets");
    root.push_attribute(("xmlns", METS_NS));
    root.push_attribute(("xmlns:xlink", XLINK_NS));
    root.push_attribute(("OBJID", submission.id().as_str()));
    root.push_attribute(("LABEL", "DSpace SWORD Item"));
    w.write_event(Event::Start(root)).map_err(wrap)?;

    // Descriptive metadata.
    let meta = SubmissionMeta::of(submission);
    let mut dmd = BytesStart::new("dmdSec");
    dmd.push_attribute(("ID", "dmd_1"));
    w.write_event(Event::Start(dmd)).map_err(wrap)?;
    let mut wrap_el = BytesStart::new("mdWrap");
    wrap_el.push_attribute(("MDTYPE", "OTHER"));
    wrap_el.push_attribute(("OTHERMDTYPE", "DIM"));
    w.write_event(Event::Start(wrap_el)).map_err(wrap)?;
    w.write_event(Event::Start(BytesStart::new("xmlData")))
        .map_err(wrap)?;
    for (element, value) in [
        ("title", meta.title()),
        ("identifier", meta.doi()),
        ("source", meta.journal()),
        ("description", meta.abstract_text()),
    ] {
        if let Some(value) = value {
            write_dim_field(&mut w, element, value).map_err(wrap)?;
        }
    }
    for author in meta.authors() {
        write_dim_field(&mut w, "contributor", author).map_err(wrap)?;
    }
    w.write_event(Event::End(BytesEnd::new("xmlData")))
        .map_err(wrap)?;
    w.write_event(Event::End(BytesEnd::new("mdWrap")))
        .map_err(wrap)?;
    w.write_event(Event::End(BytesEnd::new("dmdSec")))
        .map_err(wrap)?;

    // File section.
    w.write_event(Event::Start(BytesStart::new("fileSec")))
        .map_err(wrap)?;
    let mut grp = BytesStart::new("fileGrp");
    grp.push_attribute(("USE", "CONTENT"));
    w.write_event(Event::Start(grp)).map_err(wrap)?;
    for (index, (name, file)) in files.iter().enumerate() {
        let id = format!("file_{}", index + 1);
        let mut file_el = BytesStart::new("file");
        file_el.push_attribute(("ID", id.as_str()));
        file_el.push_attribute(("MIMETYPE", file.mime_type()));
        w.write_event(Event::Start(file_el)).map_err(wrap)?;
        let mut flocat = BytesStart::new("FLocat");
        flocat.push_attribute(("LOCTYPE", "URL"));
        flocat.push_attribute(("xlink:href", name.as_str()));
        w.write_event(Event::Empty(flocat)).map_err(wrap)?;
        w.write_event(Event::End(BytesEnd::new("file")))
            .map_err(wrap)?;
    }
    w.write_event(Event::End(BytesEnd::new("fileGrp")))
        .map_err(wrap)?;
    w.write_event(Event::End(BytesEnd::new("fileSec")))
        .map_err(wrap)?;

    // Structural map: one logical div spanning every file.
    let mut smap = BytesStart::new("structMap");
    smap.push_attribute(("TYPE", "LOGICAL"));
    w.write_event(Event::Start(smap)).map_err(wrap)?;
    let mut div = BytesStart::new("div");
    div.push_attribute(("DMDID", "dmd_1"));
    w.write_event(Event::Start(div)).map_err(wrap)?;
    for index in 1..=files.len() {
        let mut fptr = BytesStart::new("fptr");
        let id = format!("file_{index}");
        fptr.push_attribute(("FILEID", id.as_str()));
        w.write_event(Event::Empty(fptr)).map_err(wrap)?;
    }
    w.write_event(Event::End(BytesEnd::new("div"))).map_err(wrap)?;
    w.write_event(Event::End(BytesEnd::new("structMap")))
        .map_err(wrap)?;

    w.write_event(Event::End(BytesEnd::new("mets"))).map_err(wrap)?;

    Ok(w.into_inner().into_inner())
}

fn write_dim_field<W: std::io::Write>(
    w: &mut Writer<W>,
    element: &str,
    text: &str,
) -> Result<(), quick_xml::Error> {
    let mut field = BytesStart::new("field");
    field.push_attribute(("element", element));
    w.write_event(Event::Start(field))?;
    w.write_event(Event::Text(BytesText::new(text)))?;
    w.write_event(Event::End(BytesEnd::new("field")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Read as _;

    use deposit_config::{Archive, ChecksumAlgorithm, Compression};
    use deposit_types::{FileDescriptor, FileSource, RepositoryId, SubmissionId};

    use super::*;

    fn submission() -> Submission {
        let mut s = Submission::new(SubmissionId::new("s7"), vec![RepositoryId::new("r1")]);
        s.set_metadata(serde_json::json!({
            "title": "A Study of Pipes",
            "doi": "10.1000/xyz123",
        }));
        s.add_file(FileDescriptor::new(
            "article.pdf",
            "application/pdf",
            FileSource::Inline(b"%PDF-1.4".to_vec()),
        ));
        s.add_file(FileDescriptor::new(
            "mets.xml",
            "application/xml",
            FileSource::Inline(b"<fake/>".to_vec()),
        ));
        s
    }

    fn spec() -> AssemblySpec {
        AssemblySpec {
            spec_uri: METS_SPEC_URI.to_owned(),
            compression: Compression::None,
            archive: Archive::Zip,
            checksums: vec![ChecksumAlgorithm::Md5],
        }
    }

    #[tokio::test]
    async fn mets_document_leads_and_references_remediated_names() {
        let stream = DspaceMetsAssembler.assemble(&submission(), &spec()).unwrap();
        assert_eq!(stream.name(), "dspace-mets-s7.zip");

        let mut open = stream.open();
        let body = open.read_to_vec().await.unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(body)).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_owned())
            .collect();
        assert_eq!(names, ["mets.xml", "article.pdf", "user-mets.xml"]);

        let mut mets = String::new();
        archive
            .by_name("mets.xml")
            .unwrap()
            .read_to_string(&mut mets)
            .unwrap();
        assert!(mets.contains(r#"OBJID="s7""#));
        assert!(mets.contains(r#"<field element="title">A Study of Pipes</field>"#));
        assert!(mets.contains(r#"xlink:href="user-mets.xml""#));
        assert!(mets.contains(r#"FILEID="file_2""#));
    }
}
