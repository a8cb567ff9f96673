//! Compose request body and its validation.
//!
//! `upload_options` arrives as raw JSON and is decoded into the
//! [`UploadTarget`] variant selected by the image type; the shapes do not
//! overlap cleanly enough for structural matching.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::kernel::distros::DistroRegistry;
use crate::server::error::{ServiceError, ServiceErrorKind};

use super::jobs::UploadTarget;

lazy_static! {
    static ref OSTREE_REF: Regex =
        Regex::new(r"^(?:[\w\d][-._\w\d]*/)*[\w\d][-._\w\d]*$").expect("valid ostree ref pattern");
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeRequest {
    pub distribution: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_request: Option<ImageRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_requests: Option<Vec<ImageRequest>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customizations: Option<Customizations>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub koji: Option<KojiOptions>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRequest {
    pub architecture: String,
    pub image_type: ImageType,
    pub repositories: Vec<Repository>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ostree: Option<OstreeOptions>,
    /// Shape depends on `image_type`; decoded during validation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_options: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageType {
    Aws,
    AwsRhui,
    AwsHaRhui,
    AwsSapRhui,
    Azure,
    EdgeCommit,
    EdgeContainer,
    EdgeInstaller,
    Gcp,
    GuestImage,
    ImageInstaller,
    Vsphere,
}

/// The upload-option shape an image type expects.
enum UploadFamily {
    Aws,
    AwsS3,
    Gcp,
    Azure,
}

impl ImageType {
    fn upload_family(&self) -> UploadFamily {
        match self {
            Self::Aws | Self::AwsRhui | Self::AwsHaRhui | Self::AwsSapRhui => UploadFamily::Aws,
            Self::Gcp => UploadFamily::Gcp,
            Self::Azure => UploadFamily::Azure,
            Self::EdgeCommit
            | Self::EdgeContainer
            | Self::EdgeInstaller
            | Self::GuestImage
            | Self::ImageInstaller
            | Self::Vsphere => UploadFamily::AwsS3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    #[serde(default)]
    pub rhsm: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseurl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirrorlist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metalink: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpg_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_gpg: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_ssl: Option<bool>,
}

impl Repository {
    fn validate(&self) -> Result<(), ServiceError> {
        let sources = [&self.baseurl, &self.mirrorlist, &self.metalink]
            .iter()
            .filter(|s| s.is_some())
            .count();
        if sources != 1 {
            return Err(ServiceError::with_details(
                ServiceErrorKind::InvalidRepository,
                format!("{} of baseurl, mirrorlist, metalink set", sources),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OstreeOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub ostree_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customizations {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<Subscription>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packages: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<User>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_repositories: Option<Vec<Repository>>,
}

/// All fields are required when a subscription is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub organization: String,
    pub activation_key: String,
    pub server_url: String,
    pub base_url: String,
    pub insights: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
}

/// Selects the koji compose flow and forbids upload options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KojiOptions {
    pub server: String,
    pub task_id: u64,
    pub name: String,
    pub version: String,
    pub release: String,
}

// Upload option shapes, keyed by image type.

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AwsUploadOptions {
    pub region: String,
    #[serde(default)]
    pub share_with_accounts: Vec<String>,
    pub snapshot_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AwsS3UploadOptions {
    pub region: String,
}

/// `share_with_accounts` entries use the `user:`/`serviceAccount:`/`group:`/
/// `domain:` prefixes.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GcpUploadOptions {
    pub region: String,
    pub bucket: String,
    pub image_name: Option<String>,
    #[serde(default)]
    pub share_with_accounts: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AzureUploadOptions {
    pub tenant_id: String,
    pub subscription_id: String,
    pub resource_group: String,
    pub location: String,
    pub image_name: Option<String>,
}

/// A compose request that passed validation, ready for the assembler.
#[derive(Debug, Clone)]
pub struct ValidatedCompose {
    pub distribution: String,
    pub images: Vec<ValidatedImageRequest>,
    pub customizations: Option<Customizations>,
    pub koji: Option<KojiOptions>,
}

#[derive(Debug, Clone)]
pub struct ValidatedImageRequest {
    pub architecture: String,
    pub image_type: ImageType,
    pub repositories: Vec<Repository>,
    pub ostree: Option<OstreeOptions>,
    pub target: Option<UploadTarget>,
}

impl ComposeRequest {
    /// Check the request against the supported-target registry and decode
    /// per-image upload options into their typed targets.
    pub fn validate(self, distros: &DistroRegistry) -> Result<ValidatedCompose, ServiceError> {
        if !distros.supports_distribution(&self.distribution) {
            return Err(ServiceError::with_details(
                ServiceErrorKind::UnsupportedDistribution,
                self.distribution,
            ));
        }

        let images = match (self.image_request, self.image_requests) {
            (Some(single), None) => vec![single],
            (None, Some(list)) if !list.is_empty() => list,
            // Both forms, neither form, or an empty array.
            _ => return Err(ServiceErrorKind::InvalidNumberOfImageBuilds.into()),
        };
        if self.koji.is_none() && images.len() != 1 {
            return Err(ServiceErrorKind::InvalidNumberOfImageBuilds.into());
        }

        if let Some(customizations) = &self.customizations {
            for repository in customizations.payload_repositories.iter().flatten() {
                if repository.baseurl.is_none() {
                    return Err(ServiceErrorKind::NoBaseURLInPayloadRepository.into());
                }
            }
        }

        let mut validated = Vec::with_capacity(images.len());
        for image in images {
            if !distros.supports_architecture(&self.distribution, &image.architecture) {
                return Err(ServiceError::with_details(
                    ServiceErrorKind::UnsupportedArchitecture,
                    image.architecture,
                ));
            }
            if !distros.supports_image_type(&self.distribution, &image.architecture, image.image_type)
            {
                return Err(ServiceErrorKind::UnsupportedImageType.into());
            }
            for repository in &image.repositories {
                repository.validate()?;
            }
            if let Some(ostree_ref) = image.ostree.as_ref().and_then(|o| o.ostree_ref.as_deref()) {
                if !OSTREE_REF.is_match(ostree_ref) {
                    return Err(ServiceError::with_details(
                        ServiceErrorKind::InvalidOSTreeRef,
                        ostree_ref.to_string(),
                    ));
                }
            }

            let target = match (&self.koji, image.upload_options) {
                // Koji composes manage their own output location.
                (Some(_), Some(_)) => {
                    return Err(ServiceErrorKind::SeveralUploadTargets.into());
                }
                (Some(_), None) => None,
                (None, None) => return Err(ServiceErrorKind::UnknownUploadTarget.into()),
                (None, Some(options)) => Some(decode_upload_target(image.image_type, options)?),
            };

            validated.push(ValidatedImageRequest {
                architecture: image.architecture,
                image_type: image.image_type,
                repositories: image.repositories,
                ostree: image.ostree,
                target,
            });
        }

        Ok(ValidatedCompose {
            distribution: self.distribution,
            images: validated,
            customizations: self.customizations,
            koji: self.koji,
        })
    }
}

/// Object name used when the caller does not provide one.
fn generated_name() -> String {
    format!("composer-api-{}", Uuid::new_v4())
}

fn decode_upload_target(
    image_type: ImageType,
    options: serde_json::Value,
) -> Result<UploadTarget, ServiceError> {
    let unmarshal =
        |err: serde_json::Error| ServiceError::with_details(ServiceErrorKind::JSONUnMarshallingError, err.to_string());

    let target = match image_type.upload_family() {
        UploadFamily::Aws => {
            let options: AwsUploadOptions = serde_json::from_value(options).map_err(unmarshal)?;
            UploadTarget::Aws {
                region: options.region,
                share_with_accounts: options.share_with_accounts,
                snapshot_name: options.snapshot_name.unwrap_or_else(generated_name),
            }
        }
        UploadFamily::AwsS3 => {
            let options: AwsS3UploadOptions = serde_json::from_value(options).map_err(unmarshal)?;
            UploadTarget::AwsS3 {
                region: options.region,
                object_key: generated_name(),
            }
        }
        UploadFamily::Gcp => {
            let options: GcpUploadOptions = serde_json::from_value(options).map_err(unmarshal)?;
            UploadTarget::Gcp {
                region: options.region,
                bucket: options.bucket,
                image_name: options.image_name.unwrap_or_else(generated_name),
                share_with_accounts: options.share_with_accounts.unwrap_or_default(),
            }
        }
        UploadFamily::Azure => {
            let options: AzureUploadOptions = serde_json::from_value(options).map_err(unmarshal)?;
            UploadTarget::Azure {
                tenant_id: options.tenant_id,
                subscription_id: options.subscription_id,
                resource_group: options.resource_group,
                location: options.location,
                image_name: options.image_name.unwrap_or_else(generated_name),
            }
        }
    };
    Ok(target)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::kernel::distros::DistroRegistry;

    use super::*;

    fn base_repo() -> Repository {
        Repository {
            rhsm: false,
            baseurl: Some("https://repo.example.com/BaseOS".into()),
            mirrorlist: None,
            metalink: None,
            gpg_key: None,
            check_gpg: None,
            ignore_ssl: None,
        }
    }

    fn guest_image_request() -> ImageRequest {
        ImageRequest {
            architecture: "x86_64".into(),
            image_type: ImageType::GuestImage,
            repositories: vec![base_repo()],
            ostree: None,
            upload_options: Some(json!({"region": "us-east-1"})),
        }
    }

    fn request() -> ComposeRequest {
        ComposeRequest {
            distribution: "rhel-8".into(),
            image_request: Some(guest_image_request()),
            image_requests: None,
            customizations: None,
            koji: None,
        }
    }

    #[test]
    fn single_image_request_validates() {
        let compose = request().validate(&DistroRegistry::with_defaults()).unwrap();
        assert_eq!(compose.images.len(), 1);
        match &compose.images[0].target {
            Some(UploadTarget::AwsS3 { region, object_key }) => {
                assert_eq!(region, "us-east-1");
                assert!(object_key.starts_with("composer-api-"));
            }
            other => panic!("unexpected target: {:?}", other),
        }
    }

    #[test]
    fn both_image_forms_rejected() {
        let mut compose = request();
        compose.image_requests = Some(vec![guest_image_request()]);
        let err = compose.validate(&DistroRegistry::with_defaults()).unwrap_err();
        assert_eq!(err.kind(), ServiceErrorKind::InvalidNumberOfImageBuilds);
    }

    #[test]
    fn empty_image_array_rejected() {
        let mut compose = request();
        compose.image_request = None;
        compose.image_requests = Some(vec![]);
        let err = compose.validate(&DistroRegistry::with_defaults()).unwrap_err();
        assert_eq!(err.kind(), ServiceErrorKind::InvalidNumberOfImageBuilds);
    }

    #[test]
    fn multiple_images_require_koji() {
        let mut compose = request();
        compose.image_request = None;
        compose.image_requests = Some(vec![guest_image_request(), guest_image_request()]);
        let err = compose.validate(&DistroRegistry::with_defaults()).unwrap_err();
        assert_eq!(err.kind(), ServiceErrorKind::InvalidNumberOfImageBuilds);
    }

    #[test]
    fn koji_forbids_upload_options() {
        let mut compose = request();
        compose.koji = Some(KojiOptions {
            server: "https://koji.example.com".into(),
            task_id: 42,
            name: "image".into(),
            version: "1".into(),
            release: "1".into(),
        });
        let err = compose.validate(&DistroRegistry::with_defaults()).unwrap_err();
        assert_eq!(err.kind(), ServiceErrorKind::SeveralUploadTargets);
    }

    #[test]
    fn missing_upload_target_rejected() {
        let mut compose = request();
        compose.image_request.as_mut().unwrap().upload_options = None;
        let err = compose.validate(&DistroRegistry::with_defaults()).unwrap_err();
        assert_eq!(err.kind(), ServiceErrorKind::UnknownUploadTarget);
    }

    #[test]
    fn repository_requires_exactly_one_source() {
        let mut compose = request();
        let repo = &mut compose.image_request.as_mut().unwrap().repositories[0];
        repo.mirrorlist = Some("https://mirrors.example.com".into());
        let err = compose.validate(&DistroRegistry::with_defaults()).unwrap_err();
        assert_eq!(err.kind(), ServiceErrorKind::InvalidRepository);
    }

    #[test]
    fn ostree_ref_is_validated() {
        let mut compose = request();
        compose.image_request.as_mut().unwrap().ostree = Some(OstreeOptions {
            url: None,
            ostree_ref: Some("bad ref with spaces".into()),
        });
        let err = compose.validate(&DistroRegistry::with_defaults()).unwrap_err();
        assert_eq!(err.kind(), ServiceErrorKind::InvalidOSTreeRef);

        let mut compose = request();
        compose.image_request.as_mut().unwrap().ostree = Some(OstreeOptions {
            url: Some("https://ostree.example.com/repo".into()),
            ostree_ref: Some("rhel/8/x86_64/edge".into()),
        });
        assert!(compose.validate(&DistroRegistry::with_defaults()).is_ok());
    }

    #[test]
    fn payload_repositories_need_baseurl() {
        let mut compose = request();
        compose.customizations = Some(Customizations {
            subscription: None,
            packages: Some(vec!["vim".into()]),
            users: None,
            payload_repositories: Some(vec![Repository {
                baseurl: None,
                ..base_repo()
            }]),
        });
        let err = compose.validate(&DistroRegistry::with_defaults()).unwrap_err();
        assert_eq!(err.kind(), ServiceErrorKind::NoBaseURLInPayloadRepository);
    }

    #[test]
    fn unsupported_distribution_rejected() {
        let mut compose = request();
        compose.distribution = "slackware-1".into();
        let err = compose.validate(&DistroRegistry::with_defaults()).unwrap_err();
        assert_eq!(err.kind(), ServiceErrorKind::UnsupportedDistribution);
    }

    #[test]
    fn aws_upload_options_decode_with_generated_snapshot_name() {
        let mut compose = request();
        {
            let image = compose.image_request.as_mut().unwrap();
            image.image_type = ImageType::Aws;
            image.upload_options = Some(json!({
                "region": "eu-west-1",
                "share_with_accounts": ["123456789012"],
            }));
        }
        let compose = compose.validate(&DistroRegistry::with_defaults()).unwrap();
        match &compose.images[0].target {
            Some(UploadTarget::Aws {
                region,
                share_with_accounts,
                snapshot_name,
            }) => {
                assert_eq!(region, "eu-west-1");
                assert_eq!(share_with_accounts, &vec!["123456789012".to_string()]);
                assert!(snapshot_name.starts_with("composer-api-"));
            }
            other => panic!("unexpected target: {:?}", other),
        }
    }

    #[test]
    fn malformed_upload_options_rejected() {
        let mut compose = request();
        compose.image_request.as_mut().unwrap().upload_options = Some(json!({"bucket": 3}));
        let err = compose.validate(&DistroRegistry::with_defaults()).unwrap_err();
        assert_eq!(err.kind(), ServiceErrorKind::JSONUnMarshallingError);
    }
}
