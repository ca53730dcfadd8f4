//! Changes the process working directory, so it lives in its own test binary.

use abschluss_core::{Money, SourceType};
use abschluss_import::{Format, Importer, Settings};
use abschluss_storage::MemoryStore;
use std::path::Path;

#[tokio::test]
async fn bank_xml_imports_through_bare_file_name() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("index.xml"),
        r#"<DataSet>
  <DataSupplier><Name>Musterbank</Name></DataSupplier>
  <Table>
    <URL>export.csv</URL>
    <VariableColumn><Name>Buchungstag</Name><Date><Format>DD.MM.YYYY</Format></Date></VariableColumn>
    <VariableColumn><Name>Betrag</Name><Numeric/></VariableColumn>
    <VariableColumn><Name>Name</Name><AlphaNumeric/></VariableColumn>
  </Table>
</DataSet>"#,
    )
    .unwrap();
    std::fs::write(dir.path().join("EXPORT.CSV"), "01.03.2024;-1.500;Vermieter\n").unwrap();
    std::env::set_current_dir(dir.path()).unwrap();

    let store = MemoryStore::new();
    let report = Importer::new(store.clone(), Settings::default())
        .import_file(Path::new("index.xml"), None)
        .await
        .unwrap();

    assert_eq!(report.format, Format::BankXml);
    let rows = store.transactions();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].source_type, SourceType::BankXml);
    assert_eq!(rows[0].amount, Money::from_cents(-150_000));
    assert_eq!(rows[0].counterparty_name, "Vermieter");
}
