use bytes::Bytes;
use std::path::Path;

/// One uploaded multipart file.
#[derive(Debug, Clone)]
pub struct Upload {
    pub bytes: Bytes,
    pub content_type: Option<String>,
    pub file_name: Option<String>,
}

impl Upload {
    pub fn declares_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("image/"))
    }

    pub fn declares_video(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("video/"))
    }

    /// Container format from the filename extension, if allow-listed.
    pub fn extension_format(&self) -> Option<ContainerFormat> {
        let name = self.file_name.as_deref()?;
        let extension = Path::new(name).extension()?.to_str()?;
        ContainerFormat::from_extension(extension)
    }
}

/// Video containers accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Mp4,
    Avi,
    Mov,
    Mkv,
    Flv,
    Wmv,
    Webm,
}

impl ContainerFormat {
    pub const ALL: [ContainerFormat; 7] = [
        ContainerFormat::Mp4,
        ContainerFormat::Avi,
        ContainerFormat::Mov,
        ContainerFormat::Mkv,
        ContainerFormat::Flv,
        ContainerFormat::Wmv,
        ContainerFormat::Webm,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Avi => "avi",
            ContainerFormat::Mov => "mov",
            ContainerFormat::Mkv => "mkv",
            ContainerFormat::Flv => "flv",
            ContainerFormat::Wmv => "wmv",
            ContainerFormat::Webm => "webm",
        }
    }

    pub fn from_extension(extension: &str) -> Option<Self> {
        let extension = extension.trim_start_matches('.').to_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| format.extension() == extension)
    }

    pub fn from_mime(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        match essence.as_str() {
            "video/mp4" => Some(ContainerFormat::Mp4),
            "video/x-msvideo" | "video/avi" => Some(ContainerFormat::Avi),
            "video/quicktime" => Some(ContainerFormat::Mov),
            "video/x-matroska" => Some(ContainerFormat::Mkv),
            "video/x-flv" => Some(ContainerFormat::Flv),
            "video/x-ms-wmv" => Some(ContainerFormat::Wmv),
            "video/webm" => Some(ContainerFormat::Webm),
            _ => None,
        }
    }

    /// Staging format for a video upload: extension first, then the declared
    /// MIME type, then mp4.
    pub fn for_upload(upload: &Upload) -> Self {
        upload
            .extension_format()
            .or_else(|| upload.content_type.as_deref().and_then(Self::from_mime))
            .unwrap_or(ContainerFormat::Mp4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(content_type: Option<&str>, file_name: Option<&str>) -> Upload {
        Upload {
            bytes: Bytes::new(),
            content_type: content_type.map(str::to_string),
            file_name: file_name.map(str::to_string),
        }
    }

    #[test]
    fn test_declared_types() {
        assert!(upload(Some("image/png"), None).declares_image());
        assert!(!upload(Some("text/plain"), None).declares_image());
        assert!(!upload(None, Some("a.png")).declares_image());
        assert!(upload(Some("video/webm"), None).declares_video());
        assert!(!upload(Some("application/octet-stream"), None).declares_video());
    }

    #[test]
    fn test_extension_allow_list() {
        for format in ContainerFormat::ALL {
            let name = format!("clip.{}", format.extension().to_uppercase());
            assert_eq!(upload(None, Some(&name)).extension_format(), Some(format));
        }
        assert_eq!(upload(None, Some("clip.gif")).extension_format(), None);
        assert_eq!(upload(None, Some("clip")).extension_format(), None);
        assert_eq!(upload(None, None).extension_format(), None);
    }

    #[test]
    fn test_staging_format() {
        assert_eq!(
            ContainerFormat::for_upload(&upload(Some("video/mp4"), Some("road.MOV"))),
            ContainerFormat::Mov
        );
        assert_eq!(
            ContainerFormat::for_upload(&upload(Some("video/webm; codecs=vp9"), Some("road"))),
            ContainerFormat::Webm
        );
        assert_eq!(
            ContainerFormat::for_upload(&upload(Some("video/unknown"), None)),
            ContainerFormat::Mp4
        );
    }
}
