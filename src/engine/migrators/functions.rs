use std::io::{Cursor, Write};
use std::path::Path;

use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

use crate::cloud::FunctionDeploy;
use crate::db::models::{Migration, RollbackInfo};
use crate::db::repos::local::functions as function_repo;
use crate::engine::require_project;
use crate::error::AppError;
use crate::validation::validate_identifier;

use super::ItemOutcome;
use crate::engine::EngineContext;

const DEFAULT_ENTRYPOINT: &str = "index.ts";

fn zip_err(e: zip::result::ZipError) -> AppError {
    AppError::Internal(format!("Failed to package function: {e}"))
}

/// Zip a function's source directory in memory. Entries are stored with
/// `/`-separated paths relative to `dir`, in name order.
pub fn package(dir: &Path) -> Result<Vec<u8>, AppError> {
    if !dir.is_dir() {
        return Err(AppError::NotFound(format!("Function source directory {}", dir.display())));
    }

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    let mut files = 0usize;

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| AppError::Io(std::io::Error::other(e.to_string())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| AppError::Internal(e.to_string()))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        writer.start_file(name, options).map_err(zip_err)?;
        writer.write_all(&std::fs::read(entry.path())?)?;
        files += 1;
    }

    if files == 0 {
        return Err(AppError::Validation(format!(
            "Function source directory {} has no files",
            dir.display()
        )));
    }
    Ok(writer.finish().map_err(zip_err)?.into_inner())
}

/// Package and deploy one function. JWT verification stays on unless the
/// local metadata turned it off.
pub async fn migrate(ctx: &EngineContext, migration: &Migration, name: &str) -> Result<ItemOutcome, AppError> {
    validate_identifier("function", name)?;
    let function = function_repo::get_by_name(&ctx.pool, name)?;
    let dir = function_repo::source_dir(&ctx.config.functions_dir, name)?;
    let archive = package(&dir)?;

    let deploy = FunctionDeploy {
        slug: function.name.clone(),
        entrypoint: function.entrypoint.clone().unwrap_or_else(|| DEFAULT_ENTRYPOINT.to_string()),
        verify_jwt: function.verify_jwt.unwrap_or(true),
        archive,
    };

    let project_ref = require_project(migration)?;
    let management = ctx.management(migration)?;
    let deployed = management.deploy_function(project_ref, &deploy).await?;

    tracing::debug!(
        migration_id = %migration.id,
        function = %deployed.slug,
        verify_jwt = deploy.verify_jwt,
        "Function deployed"
    );
    Ok(ItemOutcome::new(
        RollbackInfo::Function { slug: deployed.slug.clone() },
        serde_json::json!({
            "entrypoint": deploy.entrypoint,
            "verify_jwt": deploy.verify_jwt,
            "archive_bytes": deploy.archive.len(),
            "status": deployed.status,
        }),
    ))
}


#[cfg(test)]
mod tests {
    use super::fixtures::seed_function;
    use super::*;
    use crate::config::MigratorConfig;
    use crate::db::init_test_db;
    use crate::engine::test_support::{context_with, TEST_SECRET};
    use std::io::Read;

    #[test]
    fn test_package_layout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("index.ts"), "export {}").unwrap();
        std::fs::write(dir.path().join("lib/a.ts"), "a").unwrap();

        let bytes = package(dir.path()).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(names, vec!["index.ts", "lib/a.ts"]);

        let mut body = String::new();
        archive.by_name("index.ts").unwrap().read_to_string(&mut body).unwrap();
        assert_eq!(body, "export {}");
    }

    #[test]
    fn test_package_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(package(dir.path()), Err(AppError::Validation(_))));
        assert!(matches!(package(&dir.path().join("nope")), Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_deploy_defaults_to_verify_jwt() {
        let dir = tempfile::tempdir().unwrap();
        let config = MigratorConfig {
            server_secret: Some(TEST_SECRET.into()),
            functions_dir: dir.path().to_path_buf(),
            ..MigratorConfig::default()
        };
        let (ctx, remote, migration) = context_with(init_test_db().unwrap(), config);
        seed_function(&ctx.pool, dir.path(), "hello", None);
        seed_function(&ctx.pool, dir.path(), "webhook", Some(false));

        migrate(&ctx, &migration, "hello").await.unwrap();
        let outcome = migrate(&ctx, &migration, "webhook").await.unwrap();

        assert_eq!(remote.function("hello").unwrap().verify_jwt, Some(true));
        assert_eq!(remote.function("webhook").unwrap().verify_jwt, Some(false));
        assert!(!remote.archive("hello").unwrap().is_empty());
        assert_eq!(outcome.metadata.unwrap()["entrypoint"], "index.ts");
    }
}
