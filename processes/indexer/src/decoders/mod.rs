//! Decoders wired into the queue consumer

mod archive;

pub use archive::ContainerArchive;

use quarry_module_queue_consumer::{decoder::ChainDecoder, QueueConsumerModule};
use quarry_common::VmType;
use std::sync::Arc;

/// Register the archive decoder for every stream of every VM
pub async fn register(consumer: &QueueConsumerModule) {
    for vm in [VmType::Avm, VmType::Pvm, VmType::Evm] {
        for stream in vm.streams() {
            consumer
                .add_decoder_factory(vm, stream.event_type, |chain, _indexer| {
                    Ok(Arc::new(ContainerArchive::new(chain)) as Arc<dyn ChainDecoder>)
                })
                .await;
        }
    }
}
