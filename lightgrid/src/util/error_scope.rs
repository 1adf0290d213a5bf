use std::{
    future::Future,
    pin::pin,
    task::{Context, Poll},
};

use wgpu::Device;

/// Captures validation errors raised while creating pipelines, so they can be
/// returned instead of reaching the device's uncaptured error handler.
#[must_use = "All error scopes must end in a call to `end`"]
pub struct ValidationErrorScope<'a> {
    device: &'a Device,
    ended: bool,
}

impl<'a> ValidationErrorScope<'a> {
    pub fn new(device: &'a Device) -> Self {
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        Self { device, ended: false }
    }

    pub fn end(mut self) -> Result<(), wgpu::Error> {
        self.ended = true;
        let mut future = pin!(self.device.pop_error_scope());
        match future.as_mut().poll(&mut Context::from_waker(&noop_waker::noop_waker())) {
            Poll::Ready(Some(error)) => Err(error),
            Poll::Ready(None) => Ok(()),
            // Browser backends resolve the scope asynchronously.
            Poll::Pending => Ok(()),
        }
    }
}

impl<'a> Drop for ValidationErrorScope<'a> {
    fn drop(&mut self) {
        if !self.ended {
            log::error!("ValidationErrorScope dropped without calling `end`");
        }
    }
}
