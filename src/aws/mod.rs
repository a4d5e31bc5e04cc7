//! AWS implementation of the provider seam, backed by the EC2 and IAM SDKs.
//!
//! Credentials and retries come from the standard `aws-config` chain. Each
//! region gets its own EC2 client; the IAM client used for the account alias
//! is global.

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_ec2::error::DisplayErrorContext;
use aws_sdk_ec2::types::{Filter, ResourceType, Tag, TagSpecification};
use thiserror::Error;
use tracing::debug;

use crate::provider::{
    ProviderFactory, ProviderFuture, Snapshot, SnapshotRequest, Volume, VolumeProvider,
};

mod convert;

use convert::{SnapshotFields, snapshot_from_sdk, volume_from_sdk};

/// Server-side filter selecting volumes that are not attached.
const AVAILABLE_FILTER: (&str, &str) = ("status", "available");

/// Owner id matching snapshots owned by the calling account.
const SELF_OWNER: &str = "self";

/// Errors raised by the AWS provider.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AwsProviderError {
    /// An SDK request failed.
    #[error("{operation} failed in {region}: {message}")]
    Request {
        /// API operation name.
        operation: &'static str,
        /// Region of the client.
        region: String,
        /// SDK error rendered with its full context.
        message: String,
    },
    /// A response lacked a required field or carried an unusable value.
    #[error("{operation} returned an unusable response in {region}: {detail}")]
    InvalidResponse {
        /// API operation name.
        operation: &'static str,
        /// Region of the client.
        region: String,
        /// What was wrong with the response.
        detail: String,
    },
}

impl AwsProviderError {
    fn request<E: std::error::Error + 'static>(
        operation: &'static str,
        region: &str,
        err: &E,
    ) -> Self {
        Self::Request {
            operation,
            region: region.to_owned(),
            message: DisplayErrorContext(err).to_string(),
        }
    }
}

/// Builds one [`Ec2Provider`] per region from the ambient AWS configuration.
#[derive(Clone, Debug)]
pub struct AwsProviderFactory {
    endpoint_url: Option<String>,
    iam: aws_sdk_iam::Client,
}

impl AwsProviderFactory {
    /// Loads the shared AWS configuration. `home_region` is used for the
    /// global IAM client; `endpoint_url` overrides every service endpoint,
    /// for example to target LocalStack.
    pub async fn new(home_region: &str, endpoint_url: Option<String>) -> Self {
        let sdk_config = load_sdk_config(home_region).await;
        let mut iam_config = aws_sdk_iam::config::Builder::from(&sdk_config);
        if let Some(url) = &endpoint_url {
            iam_config = iam_config.endpoint_url(url);
        }
        Self {
            endpoint_url,
            iam: aws_sdk_iam::Client::from_conf(iam_config.build()),
        }
    }
}

async fn load_sdk_config(region: &str) -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_owned()))
        .load()
        .await
}

impl ProviderFactory for AwsProviderFactory {
    type Provider = Ec2Provider;

    fn connect<'a>(
        &'a self,
        region: &'a str,
    ) -> ProviderFuture<'a, Self::Provider, AwsProviderError> {
        Box::pin(async move {
            let sdk_config = load_sdk_config(region).await;
            let mut ec2_config = aws_sdk_ec2::config::Builder::from(&sdk_config);
            if let Some(url) = &self.endpoint_url {
                ec2_config = ec2_config.endpoint_url(url);
            }
            debug!(region, "EC2 client ready");
            Ok(Ec2Provider {
                region: region.to_owned(),
                client: aws_sdk_ec2::Client::from_conf(ec2_config.build()),
            })
        })
    }

    fn account_alias(&self) -> ProviderFuture<'_, Option<String>, AwsProviderError> {
        Box::pin(async move {
            let output = self
                .iam
                .list_account_aliases()
                .send()
                .await
                .map_err(|err| AwsProviderError::request("ListAccountAliases", "global", &err))?;
            Ok(output.account_aliases().first().cloned())
        })
    }
}

/// EC2 client bound to one region.
#[derive(Clone, Debug)]
pub struct Ec2Provider {
    region: String,
    client: aws_sdk_ec2::Client,
}

impl Ec2Provider {
    async fn describe_available_volumes(&self) -> Result<Vec<Volume>, AwsProviderError> {
        const OPERATION: &str = "DescribeVolumes";
        let (name, value) = AVAILABLE_FILTER;
        let mut volumes = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let page = self
                .client
                .describe_volumes()
                .filters(Filter::builder().name(name).values(value).build())
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|err| AwsProviderError::request(OPERATION, &self.region, &err))?;
            for volume in page.volumes() {
                volumes.push(volume_from_sdk(&self.region, volume)?);
            }
            match page.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_owned()),
                _ => break,
            }
        }
        Ok(volumes)
    }

    async fn describe_volume_snapshots(
        &self,
        volume_id: &str,
    ) -> Result<Vec<Snapshot>, AwsProviderError> {
        const OPERATION: &str = "DescribeSnapshots";
        let mut snapshots = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let page = self
                .client
                .describe_snapshots()
                .owner_ids(SELF_OWNER)
                .filters(Filter::builder().name("volume-id").values(volume_id).build())
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|err| AwsProviderError::request(OPERATION, &self.region, &err))?;
            for snapshot in page.snapshots() {
                snapshots.push(snapshot_from_sdk(
                    OPERATION,
                    &self.region,
                    volume_id,
                    SnapshotFields::from(snapshot),
                )?);
            }
            match page.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_owned()),
                _ => break,
            }
        }
        Ok(snapshots)
    }

    async fn start_snapshot(
        &self,
        request: &SnapshotRequest,
    ) -> Result<Snapshot, AwsProviderError> {
        const OPERATION: &str = "CreateSnapshot";
        let tags = request
            .tags
            .iter()
            .fold(
                TagSpecification::builder().resource_type(ResourceType::Snapshot),
                |spec, (key, value)| spec.tags(Tag::builder().key(key).value(value).build()),
            )
            .build();
        let output = self
            .client
            .create_snapshot()
            .volume_id(&request.volume_id)
            .description(&request.description)
            .tag_specifications(tags)
            .send()
            .await
            .map_err(|err| AwsProviderError::request(OPERATION, &self.region, &err))?;
        snapshot_from_sdk(
            OPERATION,
            &self.region,
            &request.volume_id,
            SnapshotFields::from(&output),
        )
    }
}

impl VolumeProvider for Ec2Provider {
    type Error = AwsProviderError;

    fn region(&self) -> &str {
        &self.region
    }

    fn list_unattached_volumes(&self) -> ProviderFuture<'_, Vec<Volume>, Self::Error> {
        Box::pin(self.describe_available_volumes())
    }

    fn list_snapshots<'a>(
        &'a self,
        volume_id: &'a str,
    ) -> ProviderFuture<'a, Vec<Snapshot>, Self::Error> {
        Box::pin(self.describe_volume_snapshots(volume_id))
    }

    fn create_snapshot<'a>(
        &'a self,
        request: &'a SnapshotRequest,
    ) -> ProviderFuture<'a, Snapshot, Self::Error> {
        Box::pin(self.start_snapshot(request))
    }

    fn delete_volume<'a>(&'a self, volume_id: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.client
                .delete_volume()
                .volume_id(volume_id)
                .send()
                .await
                .map_err(|err| AwsProviderError::request("DeleteVolume", &self.region, &err))?;
            Ok(())
        })
    }

    fn delete_snapshot<'a>(
        &'a self,
        snapshot_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.client
                .delete_snapshot()
                .snapshot_id(snapshot_id)
                .send()
                .await
                .map_err(|err| AwsProviderError::request("DeleteSnapshot", &self.region, &err))?;
            Ok(())
        })
    }
}
