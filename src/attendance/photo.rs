use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TipoFoto {
    Entrada,
    Salida,
}

impl TipoFoto {
    pub fn as_str(&self) -> &'static str {
        match self {
            TipoFoto::Entrada => "entrada",
            TipoFoto::Salida => "salida",
        }
    }
}

/// Blob storage seam for proof photos. Keys are relative paths; the
/// production impl writes to local disk served by the ERP's static route.
#[async_trait]
pub trait PhotoStore: Send + Sync {
    async fn put(&self, ruta: &str, bytes: &[u8]) -> std::io::Result<()>;
    async fn rename(&self, desde: &str, hacia: &str) -> std::io::Result<()>;
    async fn remove(&self, ruta: &str) -> std::io::Result<()>;
    async fn exists(&self, ruta: &str) -> bool;
    fn url(&self, ruta: &str) -> String;
}

pub struct FsPhotoStore {
    base_dir: PathBuf,
    base_url: String,
}

impl FsPhotoStore {
    pub fn new(base_dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            base_url: base_url.into(),
        }
    }

    fn absolute(&self, ruta: &str) -> PathBuf {
        self.base_dir.join(ruta)
    }
}

#[async_trait]
impl PhotoStore for FsPhotoStore {
    async fn put(&self, ruta: &str, bytes: &[u8]) -> std::io::Result<()> {
        let destino = self.absolute(ruta);
        if let Some(padre) = destino.parent() {
            tokio::fs::create_dir_all(padre).await?;
        }
        tokio::fs::write(destino, bytes).await
    }

    async fn rename(&self, desde: &str, hacia: &str) -> std::io::Result<()> {
        let destino = self.absolute(hacia);
        if let Some(padre) = destino.parent() {
            tokio::fs::create_dir_all(padre).await?;
        }
        tokio::fs::rename(self.absolute(desde), destino).await
    }

    async fn remove(&self, ruta: &str) -> std::io::Result<()> {
        tokio::fs::remove_file(self.absolute(ruta)).await
    }

    async fn exists(&self, ruta: &str) -> bool {
        tokio::fs::try_exists(self.absolute(ruta)).await.unwrap_or(false)
    }

    fn url(&self, ruta: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), ruta)
    }
}

/// Names and binds proof photos. A new record's id is not known at capture
/// time, so binding is two-phase: the blob is first stored under a token
/// derived from a placeholder id (0), then renamed once the real id exists.
pub struct PhotoBinder {
    ruta_base: String,
}

impl PhotoBinder {
    /// Placeholder record id used before the row is persisted.
    pub const ID_PROVISIONAL: u64 = 0;

    pub fn new(ruta_base: impl Into<String>) -> Self {
        Self {
            ruta_base: ruta_base.into(),
        }
    }

    /// Collision-resistant file token: sha256 over the record id, the
    /// current unix time, 16 random bytes and the staff id, truncated to
    /// 16 hex characters.
    fn token(id_registro: u64, id_personal: u64) -> String {
        let mut sal = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut sal);

        let mut hasher = Sha256::new();
        hasher.update(id_registro.to_le_bytes());
        hasher.update(Utc::now().timestamp().to_le_bytes());
        hasher.update(sal);
        hasher.update(id_personal.to_le_bytes());

        hex::encode(hasher.finalize())[..16].to_string()
    }

    /// `{base}/{YYYY}/{MM}/{tipo}_{token}.{ext}` — partitioned by the
    /// attendance date's year and month.
    pub fn ruta(&self, tipo: TipoFoto, token: &str, fecha: NaiveDate, extension: &str) -> String {
        format!(
            "{}/{}/{:02}/{}_{}.{}",
            self.ruta_base,
            fecha.year(),
            fecha.month(),
            tipo.as_str(),
            token,
            extension
        )
    }

    /// Phase 1 (or the only phase when the record id is already known):
    /// store the photo and return its reference path.
    pub async fn guardar<S: PhotoStore>(
        &self,
        store: &S,
        bytes: &[u8],
        tipo: TipoFoto,
        id_registro: u64,
        id_personal: u64,
        fecha: NaiveDate,
        extension: &str,
    ) -> Result<String, AppError> {
        let ruta = self.ruta(tipo, &Self::token(id_registro, id_personal), fecha, extension);
        store.put(&ruta, bytes).await.map_err(|e| {
            tracing::error!(error = %e, ruta, "failed to store attendance photo");
            AppError::Infrastructure
        })?;
        Ok(ruta)
    }

    /// Phase 2: recompute the reference with the real record id and move
    /// the blob. Returns the final path, or `None` when the move could not
    /// happen — the caller then keeps the provisional reference, which
    /// still points at the stored blob.
    pub async fn rebind<S: PhotoStore>(
        &self,
        store: &S,
        ruta_provisional: &str,
        tipo: TipoFoto,
        id_registro: u64,
        id_personal: u64,
        fecha: NaiveDate,
    ) -> Option<String> {
        let extension = Path::new(ruta_provisional)
            .extension()
            .and_then(|e| e.to_str())?;
        let nueva = self.ruta(tipo, &Self::token(id_registro, id_personal), fecha, extension);

        if !store.exists(ruta_provisional).await {
            tracing::warn!(ruta_provisional, "provisional photo missing, keeping reference");
            return None;
        }

        match store.rename(ruta_provisional, &nueva).await {
            Ok(()) => Some(nueva),
            Err(e) => {
                tracing::warn!(error = %e, ruta_provisional, "photo rename failed, keeping provisional reference");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fecha() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()
    }

    #[test]
    fn ruta_particionada_por_anio_y_mes() {
        let binder = PhotoBinder::new("asistencia/fotos");
        assert_eq!(
            binder.ruta(TipoFoto::Entrada, "abcdef0123456789", fecha(), "jpg"),
            "asistencia/fotos/2024/01/entrada_abcdef0123456789.jpg"
        );
        assert_eq!(
            binder.ruta(TipoFoto::Salida, "aa", fecha(), "png"),
            "asistencia/fotos/2024/01/salida_aa.png"
        );
    }

    #[test]
    fn token_es_hex_truncado_y_no_repetido() {
        let a = PhotoBinder::token(0, 7);
        let b = PhotoBinder::token(0, 7);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        // random salt makes collisions for the same inputs implausible
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn guardar_y_rebind_mueven_el_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsPhotoStore::new(dir.path(), "/storage");
        let binder = PhotoBinder::new("asistencia/fotos");

        let provisional = binder
            .guardar(
                &store,
                b"foto-bytes",
                TipoFoto::Entrada,
                PhotoBinder::ID_PROVISIONAL,
                7,
                fecha(),
                "jpg",
            )
            .await
            .unwrap();
        assert!(store.exists(&provisional).await);

        let definitiva = binder
            .rebind(&store, &provisional, TipoFoto::Entrada, 42, 7, fecha())
            .await
            .unwrap();

        assert!(!store.exists(&provisional).await);
        assert!(store.exists(&definitiva).await);
        let contenido = tokio::fs::read(dir.path().join(&definitiva)).await.unwrap();
        assert_eq!(contenido, b"foto-bytes");
        assert_eq!(store.url(&definitiva), format!("/storage/{definitiva}"));
    }

    #[tokio::test]
    async fn remove_elimina_el_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsPhotoStore::new(dir.path(), "/storage");
        let binder = PhotoBinder::new("asistencia/fotos");

        let ruta = binder
            .guardar(
                &store,
                b"foto",
                TipoFoto::Entrada,
                PhotoBinder::ID_PROVISIONAL,
                7,
                fecha(),
                "jpg",
            )
            .await
            .unwrap();
        assert!(store.exists(&ruta).await);

        store.remove(&ruta).await.unwrap();
        assert!(!store.exists(&ruta).await);
    }

    #[tokio::test]
    async fn rebind_sin_blob_conserva_la_referencia() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsPhotoStore::new(dir.path(), "/storage");
        let binder = PhotoBinder::new("asistencia/fotos");

        let resultado = binder
            .rebind(
                &store,
                "asistencia/fotos/2024/01/entrada_inexistente.jpg",
                TipoFoto::Entrada,
                42,
                7,
                fecha(),
            )
            .await;
        assert!(resultado.is_none());
    }

    struct RenameFailsStore {
        inner: FsPhotoStore,
    }

    #[async_trait]
    impl PhotoStore for RenameFailsStore {
        async fn put(&self, ruta: &str, bytes: &[u8]) -> std::io::Result<()> {
            self.inner.put(ruta, bytes).await
        }
        async fn rename(&self, _desde: &str, _hacia: &str) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "rename rejected"))
        }
        async fn remove(&self, ruta: &str) -> std::io::Result<()> {
            self.inner.remove(ruta).await
        }
        async fn exists(&self, ruta: &str) -> bool {
            self.inner.exists(ruta).await
        }
        fn url(&self, ruta: &str) -> String {
            self.inner.url(ruta)
        }
    }

    #[tokio::test]
    async fn rebind_con_rename_fallido_no_deja_referencia_colgante() {
        let dir = tempfile::tempdir().unwrap();
        let store = RenameFailsStore {
            inner: FsPhotoStore::new(dir.path(), "/storage"),
        };
        let binder = PhotoBinder::new("asistencia/fotos");

        let provisional = binder
            .guardar(
                &store,
                b"foto",
                TipoFoto::Entrada,
                PhotoBinder::ID_PROVISIONAL,
                7,
                fecha(),
                "jpg",
            )
            .await
            .unwrap();

        let resultado = binder
            .rebind(&store, &provisional, TipoFoto::Entrada, 42, 7, fecha())
            .await;

        // the move failed: the record keeps the provisional path, which
        // must still resolve to the stored bytes
        assert!(resultado.is_none());
        assert!(store.exists(&provisional).await);
    }
}
